use glam::{Mat4, Vec3};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

/// Orbit camera around a point in the (right-handed, Y-up) render space.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Point the camera orbits around (meters).
    pub target: Vec3,
    /// Distance from the camera to the target (meters).
    pub radius: f32,
    /// Rotation around +Y (radians).
    pub azimuth: f32,
    /// Angle above the horizontal plane (radians).
    pub elevation: f32,
    pub fovy: f32,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Camera {
    pub fn new(target: Vec3, radius: f32, aspect: f32) -> Self {
        Self {
            target,
            radius,
            azimuth: 0.0,
            elevation: 15.0f32.to_radians(),
            fovy: 60.0f32.to_radians(),
            aspect,
            znear: 0.01,
            zfar: 100.0,
        }
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_az, cos_az) = self.azimuth.sin_cos();
        let (sin_el, cos_el) = self.elevation.sin_cos();
        self.target
            + self.radius * Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// glam's `perspective_rh` already maps depth to [0, 1].
    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect, self.znear, self.zfar)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

pub struct CameraController {
    mouse_down: bool,
    last_mouse: Option<(f64, f64)>,
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            mouse_down: false,
            last_mouse: None,
        }
    }

    /// Orbits on left-drag, zooms on scroll.
    pub fn handle_event(&mut self, event: &WindowEvent, camera: &mut Camera) {
        match event {
            WindowEvent::MouseInput { button, state, .. } => {
                if *button == MouseButton::Left {
                    self.mouse_down = *state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor_orbit((position.x, position.y), camera);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };
                self.handle_scroll(scroll, camera);
            }
            _ => {}
        }
    }

    fn handle_scroll(&mut self, delta: f32, camera: &mut Camera) {
        // Scroll up zooms in.
        camera.radius = (camera.radius * 1.1f32.powf(-delta)).clamp(0.2, 50.0);
    }

    fn handle_cursor_orbit(&mut self, xy: (f64, f64), camera: &mut Camera) {
        if let Some(last) = self.last_mouse {
            if self.mouse_down {
                let dx = ((xy.0 - last.0) * 0.005) as f32;
                let dy = ((last.1 - xy.1) * 0.005) as f32;

                camera.azimuth -= dx;
                camera.elevation = (camera.elevation - dy)
                    .clamp(-80.0f32.to_radians(), 80.0f32.to_radians());
            }
        }
        self.last_mouse = Some(xy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eye_sits_at_radius() {
        let cam = Camera::new(Vec3::new(0.0, 1.0, 0.0), 3.0, 16.0 / 9.0);
        assert!((cam.eye().distance(cam.target) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn target_projects_to_screen_center() {
        let cam = Camera::new(Vec3::new(0.2, 1.0, -0.5), 2.5, 1.0);
        let clip = cam.view_proj() * cam.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn scroll_zoom_is_clamped() {
        let mut cam = Camera::new(Vec3::ZERO, 1.0, 1.0);
        let mut ctl = CameraController::new();
        for _ in 0..100 {
            ctl.handle_scroll(1.0, &mut cam);
        }
        assert_eq!(cam.radius, 0.2);
    }
}
