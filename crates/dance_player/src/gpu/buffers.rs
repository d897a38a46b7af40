use crate::error::FrameError;
use crate::gpu::convert::{ConversionStage, ConvertParams, ConvertedPoint, CONVERTED_SIZE};
use plyframe::RECORD_SIZE;
use wgpu::util::DeviceExt;

/// GPU buffers for one frame: the raw records as decoded and the converted
/// output the splat pipeline reads. Created together, never resized.
pub struct FrameBuffers {
    input: wgpu::Buffer,
    output: wgpu::Buffer,
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    point_count: u32,
}

impl std::fmt::Debug for FrameBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffers")
            .field("point_count", &self.point_count)
            .field("input_bytes", &self.input.size())
            .field("output_bytes", &self.output.size())
            .finish()
    }
}

fn alloc_err(msg: impl Into<String>) -> FrameError {
    FrameError::Alloc(msg.into())
}

impl FrameBuffers {
    /// Uploads `raw` (exactly `point_count` packed records) and reserves the
    /// uninitialized output buffer.
    pub fn allocate(
        device: &wgpu::Device,
        stage: &ConversionStage,
        point_count: usize,
        raw: &[u8],
    ) -> Result<Self, FrameError> {
        if point_count == 0 {
            return Err(alloc_err("frame has no points"));
        }

        let input_len = point_count
            .checked_mul(RECORD_SIZE)
            .ok_or_else(|| alloc_err("input size overflows"))?;
        let count = u32::try_from(point_count)
            .map_err(|_| alloc_err(format!("{point_count} points exceed u32 range")))?;
        let output_len = (point_count as u64)
            .checked_mul(CONVERTED_SIZE as u64)
            .ok_or_else(|| alloc_err("output size overflows"))?;

        let limits = device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        let max_buffer = limits.max_buffer_size;
        // Input is padded up to a 4-byte multiple on upload.
        let padded_input = (input_len as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        for (what, len) in [("input", padded_input), ("output", output_len)] {
            if len > max_binding || len > max_buffer {
                return Err(alloc_err(format!(
                    "{what} buffer of {len} bytes exceeds device limit ({})",
                    max_binding.min(max_buffer)
                )));
            }
        }

        if raw.len() != input_len {
            return Err(alloc_err(format!(
                "expected {input_len} input bytes, got {}",
                raw.len()
            )));
        }

        // Error scopes are device-wide and this runs on the scheduler thread,
        // so an OOM raised by a render-thread submission in this window is
        // reported against this frame as well.
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let input = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Input"),
            contents: raw,
            usage: wgpu::BufferUsages::STORAGE,
        });

        let output = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Output"),
            size: output_len,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Convert Params"),
            contents: bytemuck::bytes_of(&ConvertParams::new(count, stage.options())),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            input.destroy();
            output.destroy();
            params.destroy();
            return Err(alloc_err(err.to_string()));
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Convert Points BG"),
            layout: stage.bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        Ok(Self {
            input,
            output,
            params,
            bind_group,
            point_count: count,
        })
    }

    #[inline]
    pub fn point_count(&self) -> u32 {
        self.point_count
    }

    #[inline]
    pub fn output(&self) -> &wgpu::Buffer {
        &self.output
    }

    #[inline]
    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Copies the converted output back to the host. Blocks until the GPU is done.
    pub fn read_converted(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<ConvertedPoint>, wgpu::BufferAsyncError> {
        let size = self.output.size();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Output Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.output, 0, &staging, 0, size);
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx).map_err(|_| wgpu::BufferAsyncError)??;

        let mapped = slice.get_mapped_range();
        let points = bytemuck::pod_collect_to_vec::<u8, ConvertedPoint>(&mapped);
        drop(mapped);
        staging.unmap();
        staging.destroy();
        Ok(points)
    }
}

impl Drop for FrameBuffers {
    fn drop(&mut self) {
        self.input.destroy();
        self.output.destroy();
        self.params.destroy();
    }
}
