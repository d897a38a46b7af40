//! wgpu side of playback: device setup, per-frame buffers, the conversion
//! compute pass and the splat render pipeline.

pub mod backend;
pub mod buffers;
pub mod context;
pub mod convert;
pub mod splat;
