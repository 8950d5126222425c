//! One-shot capture request latch between speech workers and the video
//! worker.
//!
//! Speech workers arm the latch on a positive consent verdict; the video
//! worker consumes it on the very next frame it processes. Only one request
//! can be pending; further positives while armed are coalesced into the
//! pending one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A pending consent capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default)]
pub struct CaptureLatch {
    armed: AtomicBool,
    name: Mutex<Option<String>>,
}

impl CaptureLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the latch with the given name. Returns true if this call armed
    /// it; false if a request was already pending (the new name is dropped,
    /// coalescing into the pending request).
    pub fn arm(&self, name: Option<String>) -> bool {
        let mut slot = self.name.lock().unwrap();
        if self.armed.load(Ordering::Acquire) {
            return false;
        }
        *slot = name;
        self.armed.store(true, Ordering::Release);
        true
    }

    /// Consumes the pending request, if any. Exactly one take succeeds per
    /// arming event. The name lock is held across the flag exchange so a
    /// concurrent `arm` cannot slip its name under a request being taken.
    pub fn take(&self) -> Option<CaptureRequest> {
        let mut slot = self.name.lock().unwrap();
        if self
            .armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(CaptureRequest { name: slot.take() })
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_unarmed() {
        let latch = CaptureLatch::new();
        assert!(!latch.is_armed());
        assert!(latch.take().is_none());
    }

    #[test]
    fn test_arm_then_take() {
        let latch = CaptureLatch::new();
        assert!(latch.arm(Some("alice".to_string())));
        assert!(latch.is_armed());

        let request = latch.take().unwrap();
        assert_eq!(request.name, Some("alice".to_string()));
        assert!(!latch.is_armed());
    }

    #[test]
    fn test_take_is_one_shot() {
        let latch = CaptureLatch::new();
        latch.arm(None);
        assert!(latch.take().is_some());
        assert!(latch.take().is_none());
    }

    #[test]
    fn test_arm_coalesces_while_pending() {
        let latch = CaptureLatch::new();
        assert!(latch.arm(Some("alice".to_string())));
        // A second positive while pending does not replace the first.
        assert!(!latch.arm(Some("bob".to_string())));

        let request = latch.take().unwrap();
        assert_eq!(request.name, Some("alice".to_string()));
    }

    #[test]
    fn test_rearm_after_take() {
        let latch = CaptureLatch::new();
        latch.arm(Some("alice".to_string()));
        latch.take();

        assert!(latch.arm(Some("bob".to_string())));
        let request = latch.take().unwrap();
        assert_eq!(request.name, Some("bob".to_string()));
    }

    #[test]
    fn test_arm_without_name() {
        let latch = CaptureLatch::new();
        latch.arm(None);
        let request = latch.take().unwrap();
        assert_eq!(request.name, None);
    }

    #[test]
    fn test_concurrent_takers_get_exactly_one() {
        let latch = Arc::new(CaptureLatch::new());
        latch.arm(Some("alice".to_string()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let latch = latch.clone();
            handles.push(std::thread::spawn(move || latch.take().is_some()));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
