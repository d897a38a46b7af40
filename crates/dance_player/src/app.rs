use crate::{
    camera::{Camera, CameraController},
    config::Config,
    gpu::{
        backend::{GpuFrameLoader, WgpuBackend},
        buffers::FrameBuffers,
        context::GfxContext,
        convert::{ConversionOptions, ConversionStage},
        splat::SplatPipeline,
    },
    hud::{self, HudInfo},
    mailbox::Mailbox,
    placement::PlacementGate,
    presenter::FramePresenter,
    scheduler::{FrameMailbox, PlaybackHandle, Scheduler, SchedulerConfig},
};
use anyhow::{bail, Context, Result};
use glam::{Mat4, Vec3};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;
use winit::{
    event::{ElementState, WindowEvent},
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.03,
    a: 1.0,
};

/// All `*.ply` files under `root`, in lexical path order.
pub fn discover_frames(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("frames directory '{}' does not exist", root.display());
    }

    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("ply"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    Ok(paths)
}

pub struct App {
    pub gfx: GfxContext,
    pub camera: Camera,
    pub camera_controller: CameraController,
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    stage: Arc<ConversionStage>,
    splat: SplatPipeline,
    mailbox: Arc<FrameMailbox<FrameBuffers>>,
    presenter: FramePresenter<FrameBuffers>,
    playback: Option<PlaybackHandle<FrameBuffers>>,
    placement: PlacementGate,
    sources: Vec<PathBuf>,
    config: Config,
}

impl App {
    pub async fn new(window: Arc<Window>, config: Config) -> Result<Self> {
        let sources = discover_frames(&config.frames_dir)?;
        if sources.is_empty() {
            bail!("no .ply frames found in '{}'", config.frames_dir.display());
        }
        tracing::info!(
            frames = sources.len(),
            dir = %config.frames_dir.display(),
            "discovered frame sources"
        );

        let gfx = GfxContext::new(window.clone())
            .await
            .context("failed to initialise GPU")?;

        let stage = Arc::new(ConversionStage::new(
            gfx.device(),
            ConversionOptions {
                gamma_correct: config.gamma,
            },
        ));
        let splat = SplatPipeline::new(gfx.device(), gfx.config.format);
        let egui_renderer =
            egui_wgpu::Renderer::new(gfx.device(), gfx.config.format, None, 1);

        let anchor = config.anchor;
        let camera = Camera::new(
            anchor + Vec3::new(0.0, 0.9, 0.0),
            3.0,
            gfx.size.width as f32 / gfx.size.height.max(1) as f32,
        );

        let placement =
            PlacementGate::new((!config.unplaced).then(|| Mat4::from_translation(anchor)));

        let mailbox = Arc::new(Mailbox::new());
        let presenter = FramePresenter::new(mailbox.clone(), placement.clone())
            .with_begin_playback(|| tracing::info!("begin playback"));

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            &*window,
            None,
            None,
        );

        Ok(Self {
            gfx,
            camera,
            camera_controller: CameraController::new(),
            egui_ctx,
            egui_state,
            egui_renderer,
            stage,
            splat,
            mailbox,
            presenter,
            playback: None,
            placement,
            sources,
            config,
        })
    }

    /// (Re)starts playback from frame 0.
    pub fn start_playback(&mut self) -> Result<()> {
        self.stop_playback();

        let loader = GpuFrameLoader::new(self.gfx.gpu.clone(), self.stage.clone());
        let scheduler = Scheduler::new(
            loader,
            self.sources.clone(),
            self.mailbox.clone(),
            SchedulerConfig {
                fps: self.config.fps,
                ..SchedulerConfig::default()
            },
        )?;

        self.presenter.start_animation();
        self.playback = Some(scheduler.spawn_on_thread()?);
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        if let Some(mut handle) = self.playback.take() {
            handle.stop();
        }
        self.presenter.reset();
    }

    pub fn toggle_placement(&mut self) {
        if self.placement.is_present() {
            self.placement.clear();
            tracing::info!("placement cleared");
        } else {
            let anchor = self.config.anchor;
            self.placement.set(Some(Mat4::from_translation(anchor)));
            tracing::info!(x = anchor.x, y = anchor.y, z = anchor.z, "placed");
        }
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.gfx.resize(new_size);
            self.camera.set_aspect(new_size.width, new_size.height);
        }
    }

    /// Returns `true` when the event was consumed.
    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(window, event);
        if response.consumed {
            return true;
        }

        if let WindowEvent::KeyboardInput { event: key, .. } = event {
            if key.state == ElementState::Pressed && !key.repeat {
                match key.physical_key {
                    PhysicalKey::Code(KeyCode::KeyP) => {
                        self.toggle_placement();
                        return true;
                    }
                    PhysicalKey::Code(KeyCode::Space) => {
                        if let Err(err) = self.start_playback() {
                            tracing::error!(error = %err, "failed to restart playback");
                        }
                        return true;
                    }
                    _ => {}
                }
            }
        }

        self.camera_controller.handle_event(event, &mut self.camera);

        if let WindowEvent::Resized(physical_size) = event {
            self.resize(*physical_size);
        }

        false
    }

    pub fn render(&mut self, window: &Window) -> Result<(), wgpu::SurfaceError> {
        let frame = self.gfx.surface.get_current_texture()?;
        let swap_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gfx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut backend = WgpuBackend::new(
                self.gfx.queue(),
                &self.stage,
                &self.splat,
                &mut encoder,
                &swap_view,
                self.camera.view_proj(),
                self.config.point_radius,
                CLEAR_COLOR,
            );
            self.presenter.tick(&mut backend);
            backend.finish();
        }

        if !self.config.no_hud {
            self.record_hud(window, &mut encoder, &swap_view);
        }

        self.gfx.queue().submit(std::iter::once(encoder.finish()));
        frame.present();

        Ok(())
    }

    fn record_hud(
        &mut self,
        window: &Window,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
    ) {
        let info = HudInfo {
            stats: self
                .playback
                .as_ref()
                .map(|p| p.stats().snapshot())
                .unwrap_or_default(),
            active_index: self.presenter.active_index(),
            source_count: self.sources.len(),
            fps: self.config.fps,
            placed: self.placement.is_present(),
            playing: self.playback.as_ref().is_some_and(|p| p.is_running()),
        };

        let egui_input = self.egui_state.take_egui_input(window);
        self.egui_ctx.begin_frame(egui_input);
        hud::draw_hud(&self.egui_ctx, &info);
        let egui_output = self.egui_ctx.end_frame();
        self.egui_state
            .handle_platform_output(window, egui_output.platform_output);

        let shapes = self
            .egui_ctx
            .tessellate(egui_output.shapes, self.egui_ctx.pixels_per_point());
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.gfx.config.width, self.gfx.config.height],
            pixels_per_point: self.egui_ctx.pixels_per_point(),
        };

        for (id, delta) in &egui_output.textures_delta.set {
            self.egui_renderer
                .update_texture(self.gfx.device(), self.gfx.queue(), *id, delta);
        }
        self.egui_renderer.update_buffers(
            self.gfx.device(),
            self.gfx.queue(),
            encoder,
            &shapes,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("HUD Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &shapes, &screen_descriptor);
        }

        for id in &egui_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plyframe::PointRecord;

    #[test]
    fn discovers_ply_files_sorted() {
        let root = std::env::temp_dir().join("dance_player_discover");
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("nested")).unwrap();

        let pt = [PointRecord::new([0.0; 3], [0; 3], [0.0; 3])];
        for name in ["frame_0002.ply", "frame_0000.ply", "frame_0001.ply"] {
            plyframe::write_file(root.join(name), &pt).unwrap();
        }
        std::fs::write(root.join("notes.txt"), b"ignored").unwrap();

        let found = discover_frames(&root).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["frame_0000.ply", "frame_0001.ply", "frame_0002.ply"]);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(discover_frames(Path::new("/nonexistent/dance/frames")).is_err());
    }
}
