use std::time::Duration;

use tokio::time::Instant;

/// Inverse-zoom scaling of an on-screen length into engine page units.
fn unzoom(length: u32, zoom: u32) -> u32 {
    let zoom = u64::from(zoom.max(1));
    let scaled = u64::from(length) * 100 / zoom;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Target engine page size. Explicit lengths are on-screen units and get
/// rescaled by `100 / zoom`; without one the live viewport is used as is.
pub fn plan_dimensions(
    explicit_width: Option<u32>,
    explicit_height: Option<u32>,
    viewport_width: u32,
    viewport_height: u32,
    zoom: u32,
) -> (u32, u32) {
    let width = explicit_width
        .map(|width| unzoom(width, zoom))
        .unwrap_or(viewport_width);
    let height = explicit_height
        .map(|height| unzoom(height, zoom))
        .unwrap_or(viewport_height);
    (width, height)
}

/// A cancelable one-shot delay. Each trigger replaces the pending deadline,
/// so a burst of triggers fires once, `delay` after the last of them.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn trigger(&mut self) -> Instant {
        self.trigger_at(Instant::now())
    }

    pub fn trigger_at(&mut self, now: Instant) -> Instant {
        self.cancel();
        let deadline = now + self.delay;
        self.deadline = Some(deadline);
        deadline
    }

    /// Drops the pending deadline; returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consumes the pending deadline if it has elapsed by `now`.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[derive(Debug, Clone)]
pub struct LayoutPlanner {
    explicit_width: Option<u32>,
    explicit_height: Option<u32>,
    viewport_width: u32,
    viewport_height: u32,
    debouncer: Debouncer,
}

impl LayoutPlanner {
    pub fn new(delay: Duration) -> Self {
        Self {
            explicit_width: None,
            explicit_height: None,
            viewport_width: 0,
            viewport_height: 0,
            debouncer: Debouncer::new(delay),
        }
    }

    pub fn set_explicit_width(&mut self, width: Option<u32>) {
        self.explicit_width = width;
    }

    pub fn set_explicit_height(&mut self, height: Option<u32>) {
        self.explicit_height = height;
    }

    pub fn explicit_width(&self) -> Option<u32> {
        self.explicit_width
    }

    pub fn explicit_height(&self) -> Option<u32> {
        self.explicit_height
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport_width = width;
        self.viewport_height = height;
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn plan(&self, zoom: u32) -> (u32, u32) {
        plan_dimensions(
            self.explicit_width,
            self.explicit_height,
            self.viewport_width,
            self.viewport_height,
            zoom,
        )
    }

    pub fn request_relayout(&mut self) -> Instant {
        self.debouncer.trigger()
    }

    pub fn cancel_relayout(&mut self) -> bool {
        self.debouncer.cancel()
    }

    pub fn pending_relayout(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn take_due_relayout(&mut self, now: Instant) -> bool {
        self.debouncer.take_due(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dimensions_are_unzoomed() {
        assert_eq!(plan_dimensions(Some(800), Some(600), 1, 1, 20), (4000, 3000));
        assert_eq!(plan_dimensions(Some(800), None, 1024, 768, 100), (800, 768));
        assert_eq!(plan_dimensions(None, None, 1024, 768, 50), (1024, 768));
    }

    #[test]
    fn axes_are_planned_independently() {
        assert_eq!(plan_dimensions(None, Some(500), 1200, 900, 50), (1200, 1000));
    }

    #[test]
    fn retrigger_replaces_pending_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.trigger_at(start);
        let last = debouncer.trigger_at(start + Duration::from_millis(60));

        assert!(!debouncer.take_due(start + Duration::from_millis(110)));
        assert!(debouncer.take_due(last));
        assert!(!debouncer.is_pending());
        assert!(!debouncer.take_due(last + Duration::from_secs(1)));
    }

    #[test]
    fn cancel_drops_pending_trigger() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        assert!(!debouncer.cancel());
        debouncer.trigger();
        assert!(debouncer.cancel());
        assert_eq!(debouncer.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeping_until_deadline_waits_for_delay() {
        let mut planner = LayoutPlanner::new(Duration::from_millis(100));
        planner.request_relayout();
        let deadline = planner.pending_relayout();

        sleep_until_deadline(deadline).await;
        assert!(planner.take_due_relayout(Instant::now()));
    }

    #[test]
    fn planner_uses_viewport_until_override() {
        let mut planner = LayoutPlanner::new(Duration::from_millis(100));
        planner.set_viewport(1280, 720);
        assert_eq!(planner.plan(20), (1280, 720));
        planner.set_explicit_width(Some(640));
        assert_eq!(planner.plan(20), (3200, 720));
        planner.set_explicit_width(None);
        assert_eq!(planner.plan(20), (1280, 720));
    }
}
