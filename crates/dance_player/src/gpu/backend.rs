use crate::error::FrameError;
use crate::gpu::buffers::FrameBuffers;
use crate::gpu::context::GpuDevice;
use crate::gpu::convert::ConversionStage;
use crate::gpu::splat::{SplatPipeline, SplatUniform};
use crate::presenter::{DrawCall, RenderBackend};
use crate::scheduler::FrameLoader;
use glam::Mat4;
use std::path::Path;
use std::sync::Arc;

/// Reads a frame file, decodes it and uploads it, all on the scheduler thread.
pub struct GpuFrameLoader {
    gpu: GpuDevice,
    stage: Arc<ConversionStage>,
}

impl GpuFrameLoader {
    pub fn new(gpu: GpuDevice, stage: Arc<ConversionStage>) -> Self {
        Self { gpu, stage }
    }
}

impl FrameLoader for GpuFrameLoader {
    type Frame = FrameBuffers;

    fn load(&self, source: &Path) -> Result<FrameBuffers, FrameError> {
        let frame = plyframe::read_file(source)
            .map_err(|e| FrameError::from_read(source.to_path_buf(), e))?;
        FrameBuffers::allocate(&self.gpu.device, &self.stage, frame.point_count(), frame.as_bytes())
    }
}

/// Records one render tick into `encoder`: conversion (when requested),
/// then a clear pass over `target` with the optional splat draw.
pub struct WgpuBackend<'a> {
    pub queue: &'a wgpu::Queue,
    pub stage: &'a ConversionStage,
    pub splat: &'a SplatPipeline,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub target: &'a wgpu::TextureView,
    pub view_proj: Mat4,
    pub radius: f32,
    pub clear: wgpu::Color,
    recorded: bool,
}

impl<'a> WgpuBackend<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: &'a wgpu::Queue,
        stage: &'a ConversionStage,
        splat: &'a SplatPipeline,
        encoder: &'a mut wgpu::CommandEncoder,
        target: &'a wgpu::TextureView,
        view_proj: Mat4,
        radius: f32,
        clear: wgpu::Color,
    ) -> Self {
        Self {
            queue,
            stage,
            splat,
            encoder,
            target,
            view_proj,
            radius,
            clear,
            recorded: false,
        }
    }

    /// Makes sure the target was cleared even when the tick recorded nothing.
    pub fn finish(mut self) {
        if !self.recorded {
            self.present(None);
        }
    }
}

impl RenderBackend for WgpuBackend<'_> {
    type Frame = FrameBuffers;

    fn convert(&mut self, frame: &FrameBuffers) {
        self.stage.encode(self.encoder, frame);
    }

    fn present(&mut self, draw: Option<DrawCall<'_, FrameBuffers>>) {
        if let Some(d) = &draw {
            self.splat.update(
                self.queue,
                &SplatUniform::new(self.view_proj, d.placement, self.radius),
            );
        }

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Splat Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(d) = draw {
            self.splat.draw(&mut pass, d.frame.output(), d.instance_count);
        }
        self.recorded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::convert::ConversionOptions;
    use plyframe::PointRecord;

    #[test]
    fn loader_reports_missing_file_as_io() {
        let Ok(gpu) = pollster::block_on(GpuDevice::headless()) else {
            return;
        };
        let stage = Arc::new(ConversionStage::new(&gpu.device, ConversionOptions::default()));
        let loader = GpuFrameLoader::new(gpu, stage);

        let err = loader
            .load(Path::new("/nonexistent/dance/frame_0000.ply"))
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn loader_uploads_decoded_frame() {
        let Ok(gpu) = pollster::block_on(GpuDevice::headless()) else {
            return;
        };
        let stage = Arc::new(ConversionStage::new(&gpu.device, ConversionOptions::default()));
        let loader = GpuFrameLoader::new(gpu.clone(), stage.clone());

        let path = std::env::temp_dir().join("dance_player_backend_frame.ply");
        let points = [
            PointRecord::new([2.0, 1.0, 0.0], [255, 255, 255], [0.0; 3]),
            PointRecord::new([-3.0, 0.5, 1.0], [0, 0, 0], [0.0; 3]),
        ];
        plyframe::write_file(&path, &points).unwrap();

        let buffers = loader.load(&path).unwrap();
        assert_eq!(buffers.point_count(), 2);

        stage.run(&gpu.device, &gpu.queue, &buffers);
        let out = buffers.read_converted(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(out[0].position, [-2.0, 1.0, 0.0, 0.0]);
        assert_eq!(out[1].position, [3.0, 0.5, 1.0, 0.0]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn gate_absent_records_clear_only() {
        let Ok(gpu) = pollster::block_on(GpuDevice::headless()) else {
            return;
        };
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let stage = ConversionStage::new(&gpu.device, ConversionOptions::default());
        let splat = SplatPipeline::new(&gpu.device, format);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Test Target"),
            size: wgpu::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        let mut backend = WgpuBackend::new(
            &gpu.queue,
            &stage,
            &splat,
            &mut encoder,
            &view,
            Mat4::IDENTITY,
            0.01,
            wgpu::Color::BLACK,
        );
        backend.present(None);
        assert!(backend.recorded);
        backend.finish();

        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
    }
}
