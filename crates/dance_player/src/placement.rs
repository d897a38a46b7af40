use glam::Mat4;
use parking_lot::RwLock;
use std::sync::Arc;

/// Where the point cloud is anchored in the world, if anywhere.
///
/// Written by whatever owns placement (the viewer's keyboard toggle, an
/// anchor service) through [`PlacementGate::set`]; read by the render tick
/// every frame. Nothing is drawn while the gate is absent.
#[derive(Debug, Clone, Default)]
pub struct PlacementGate {
    transform: Arc<RwLock<Option<Mat4>>>,
}

impl PlacementGate {
    pub fn new(initial: Option<Mat4>) -> Self {
        Self {
            transform: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, transform: Option<Mat4>) {
        *self.transform.write() = transform;
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// Current transform. `None` means absent.
    #[inline]
    pub fn get(&self) -> Option<Mat4> {
        *self.transform.read()
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.transform.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn clones_share_state() {
        let gate = PlacementGate::default();
        let writer = gate.clone();
        assert_eq!(gate.get(), None);

        let m = Mat4::from_translation(Vec3::new(0.0, 1.2, -2.0));
        writer.set(Some(m));
        assert_eq!(gate.get(), Some(m));
        assert!(gate.is_present());

        writer.clear();
        assert!(!gate.is_present());
    }
}
