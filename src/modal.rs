use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalKind {
    Image,
    Video,
    Slides,
    ClearHistory,
}

/// Single-slot exclusive dialog state: at most one modal is open at any
/// time, and opening another replaces it (last writer visible).
#[derive(Default)]
pub struct ModalRouter {
    slot: Mutex<Option<ModalKind>>,
}

impl ModalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ModalKind> {
        *self.slot.lock().unwrap()
    }

    pub fn open(&self, kind: ModalKind) {
        let mut slot = self.slot.lock().unwrap();
        if let Some(previous) = slot.replace(kind) {
            debug!("Modal {:?} replaced {:?}", kind, previous);
        }
    }

    pub fn close(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Atomically verify that `kind` is the open modal and close it. A
    /// submit against a different (or no) open modal is rejected, so a
    /// stale form cannot complete after the user switched dialogs.
    pub fn take_if(&self, kind: ModalKind) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if *slot == Some(kind) {
            slot.take();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let router = ModalRouter::new();
        assert_eq!(router.current(), None);
    }

    #[test]
    fn last_open_request_wins() {
        let router = ModalRouter::new();
        router.open(ModalKind::Video);
        router.open(ModalKind::Image);
        // Never two dialogs at once; the most recent request is the one
        // visible.
        assert_eq!(router.current(), Some(ModalKind::Image));
    }

    #[test]
    fn close_clears_the_slot() {
        let router = ModalRouter::new();
        router.open(ModalKind::Slides);
        router.close();
        assert_eq!(router.current(), None);
    }

    #[test]
    fn take_if_only_matches_the_open_modal() {
        let router = ModalRouter::new();
        router.open(ModalKind::ClearHistory);

        assert!(!router.take_if(ModalKind::Image));
        assert_eq!(router.current(), Some(ModalKind::ClearHistory));

        assert!(router.take_if(ModalKind::ClearHistory));
        assert_eq!(router.current(), None);
        assert!(!router.take_if(ModalKind::ClearHistory));
    }
}
