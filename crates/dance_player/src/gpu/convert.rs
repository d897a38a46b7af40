//! Coordinate/color conversion stage: source records -> render-space points.

use crate::gpu::buffers::FrameBuffers;
use plyframe::PointRecord;
use rayon::prelude::*;

/// Threads per workgroup; must match `@workgroup_size` in `convert_points.wgsl`.
pub const WORKGROUP_SIZE: u32 = 64;

/// Per-dimension dispatch limit guaranteed by every backend.
const MAX_GROUPS_PER_DIM: u32 = 65_535;

/// One converted point as stored in the output buffer and read by the splat
/// pipeline as per-instance data. Must match `ConvertedPoint` in the shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvertedPoint {
    /// Right-handed position, w unused (0).
    pub position: [f32; 4],
    /// Normalized color, w unused (0).
    pub color: [f32; 4],
}

/// Output bytes per point: two 16-byte aligned vec4 records.
pub const CONVERTED_SIZE: usize = 32;

const _: [(); CONVERTED_SIZE] = [(); core::mem::size_of::<ConvertedPoint>()];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Treat source colors as sRGB and linearize them. Off by default.
    pub gamma_correct: bool,
}

/// Uniform block for one conversion dispatch, std140 (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConvertParams {
    pub point_count: u32,
    pub gamma_correct: u32,
    pub _pad: [u32; 2],
}

const _: [(); 16] = [(); core::mem::size_of::<ConvertParams>()];

impl ConvertParams {
    pub fn new(point_count: u32, options: ConversionOptions) -> Self {
        Self {
            point_count,
            gamma_correct: options.gamma_correct as u32,
            _pad: [0; 2],
        }
    }
}

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Reference implementation of the kernel for one point.
pub fn convert_point(record: &PointRecord, options: ConversionOptions) -> ConvertedPoint {
    let position = record.position;
    let color = record.color;

    let mut rgb = color.map(|c| c as f32 / 255.0);
    if options.gamma_correct {
        rgb = rgb.map(srgb_to_linear);
    }

    ConvertedPoint {
        position: [-position[0], position[1], position[2], 0.0],
        color: [rgb[0], rgb[1], rgb[2], 0.0],
    }
}

/// Converts a whole frame on the CPU, in parallel.
pub fn convert_points_cpu(records: &[PointRecord], options: ConversionOptions) -> Vec<ConvertedPoint> {
    records
        .par_iter()
        .map(|record| convert_point(record, options))
        .collect()
}

/// Workgroup counts covering `point_count` invocations.
pub fn dispatch_size(point_count: u32) -> (u32, u32) {
    let groups = point_count.div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_GROUPS_PER_DIM);
    (x, groups.div_ceil(x))
}

/// The conversion compute pipeline, created once at startup.
pub struct ConversionStage {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    options: ConversionOptions,
}

impl ConversionStage {
    pub fn new(device: &wgpu::Device, options: ConversionOptions) -> Self {
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Convert Points BGL"),
            entries: &[
                storage(0, true),
                storage(1, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ConvertParams>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shaders/convert_points.wgsl"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/convert_points.wgsl").into(),
            ),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Convert Points PipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Convert Points Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "cs_convert",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Self {
            pipeline,
            layout,
            options,
        }
    }

    #[inline]
    pub fn options(&self) -> ConversionOptions {
        self.options
    }

    #[inline]
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Records the conversion of `buffers` into `encoder`.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, buffers: &FrameBuffers) {
        let (x, y) = dispatch_size(buffers.point_count());

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Convert Points Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, buffers.bind_group(), &[]);
        pass.dispatch_workgroups(x, y, 1);
    }

    /// Encodes and submits a conversion on its own.
    pub fn run(&self, device: &wgpu::Device, queue: &wgpu::Queue, buffers: &FrameBuffers) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Convert Points Encoder"),
        });
        self.encode(&mut encoder, buffers);
        queue.submit(std::iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::context::GpuDevice;

    fn sample() -> Vec<PointRecord> {
        vec![
            PointRecord::new([1.5, -2.0, 3.25], [255, 0, 128], [9.0, 9.0, 9.0]),
            PointRecord::new([-0.0, 0.0, -7.0], [0, 51, 255], [0.0; 3]),
            PointRecord::new([-4.0, 100.0, 0.5], [10, 20, 30], [1.0, 2.0, 3.0]),
        ]
    }

    #[test]
    fn flips_x_and_normalizes_color() {
        let out = convert_point(&sample()[0], ConversionOptions::default());
        assert_eq!(out.position, [-1.5, -2.0, 3.25, 0.0]);
        assert_eq!(out.color, [1.0, 0.0, 128.0 / 255.0, 0.0]);
    }

    #[test]
    fn gamma_is_opt_in() {
        let rec = PointRecord::new([0.0; 3], [128, 128, 128], [0.0; 3]);
        let plain = convert_point(&rec, ConversionOptions::default());
        let linear = convert_point(&rec, ConversionOptions { gamma_correct: true });

        assert!((plain.color[0] - 0.50196).abs() < 1e-4);
        assert!((linear.color[0] - 0.21586).abs() < 1e-4);
        assert_eq!(linear.color[3], 0.0);
    }

    #[test]
    fn cpu_conversion_is_idempotent() {
        let records = sample();
        let a = convert_points_cpu(&records, ConversionOptions::default());
        let b = convert_points_cpu(&records, ConversionOptions::default());
        assert_eq!(a, b);
        assert_eq!(a.len(), records.len());
    }

    #[test]
    fn dispatch_covers_every_point() {
        assert_eq!(dispatch_size(1), (1, 1));
        assert_eq!(dispatch_size(64), (1, 1));
        assert_eq!(dispatch_size(65), (2, 1));
        assert_eq!(dispatch_size(165_639), (2_589, 1));

        let big = 10_000_000;
        let (x, y) = dispatch_size(big);
        assert!(x <= MAX_GROUPS_PER_DIM);
        assert!(x as u64 * y as u64 * WORKGROUP_SIZE as u64 >= big as u64);
    }

    #[test]
    fn gpu_matches_cpu_and_rerun_is_noop() {
        let Ok(gpu) = pollster::block_on(GpuDevice::headless()) else {
            eprintln!("no GPU adapter; skipping");
            return;
        };

        let records = sample();
        let frame = plyframe::Frame::from_points(&records);
        let stage = ConversionStage::new(&gpu.device, ConversionOptions::default());
        let buffers =
            FrameBuffers::allocate(&gpu.device, &stage, frame.point_count(), frame.as_bytes())
                .unwrap();

        stage.run(&gpu.device, &gpu.queue, &buffers);
        let first = buffers.read_converted(&gpu.device, &gpu.queue).unwrap();

        stage.run(&gpu.device, &gpu.queue, &buffers);
        let second = buffers.read_converted(&gpu.device, &gpu.queue).unwrap();

        assert_eq!(first, second);

        let expected = convert_points_cpu(&records, ConversionOptions::default());
        for (gpu_pt, cpu_pt) in first.iter().zip(&expected) {
            assert_eq!(gpu_pt.position, cpu_pt.position);
            for k in 0..4 {
                assert!((gpu_pt.color[k] - cpu_pt.color[k]).abs() < 1e-6);
            }
        }
    }
}
