//! Detection scheduling state machine.
//!
//! `Idle → Detecting → Publishing → Idle`, with `Stopped` as a terminal
//! state. At most one detection is in flight; a frame offered while a
//! detection is outstanding is dropped, never queued.

use crate::detector::DetectorError;
use crate::types::LandmarkSet;
use serde::Serialize;

/// Identifies one submitted detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    /// Camera sequence number of the submitted frame.
    pub sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Detecting(Ticket),
    Publishing(Ticket),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A detection is already in flight or being published.
    Busy,
    /// The detector has not finished initializing.
    NotReady,
    /// The frame cannot contain a usable face (e.g. a dark frame).
    NotFaceCapable,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Submit(Ticket),
    Drop(DropReason),
}

/// The newest faces, ready for renderers. An empty list means "no face".
#[derive(Debug, Clone)]
pub struct Publication {
    pub ticket: Ticket,
    pub faces: Vec<LandmarkSet>,
}

#[derive(Debug)]
pub enum Completion {
    Publish(Publication),
    Discarded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub dropped: u64,
    pub published: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    state: SchedulerState,
    ready: bool,
    next_id: u64,
    last_published: Option<u64>,
    stats: SchedulerStats,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler that drops every frame until [`mark_ready`](Self::mark_ready).
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            ready: false,
            next_id: 0,
            last_published: None,
            stats: SchedulerStats::default(),
        }
    }

    /// The detector finished initializing; frames may now be submitted.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Offer a new frame. Only an idle, ready scheduler accepts it.
    pub fn offer(&mut self, sequence: u32, face_capable: bool) -> Admission {
        let reason = match self.state {
            SchedulerState::Stopped => Some(DropReason::Stopped),
            SchedulerState::Detecting(_) | SchedulerState::Publishing(_) => Some(DropReason::Busy),
            SchedulerState::Idle if !self.ready => Some(DropReason::NotReady),
            SchedulerState::Idle if !face_capable => Some(DropReason::NotFaceCapable),
            SchedulerState::Idle => None,
        };

        if let Some(reason) = reason {
            self.stats.dropped += 1;
            return Admission::Drop(reason);
        }

        let ticket = Ticket {
            id: self.next_id,
            sequence,
        };
        self.next_id += 1;
        self.stats.submitted += 1;
        self.state = SchedulerState::Detecting(ticket);
        Admission::Submit(ticket)
    }

    /// Feed back the outcome of a detection.
    ///
    /// Results for anything but the in-flight ticket, results older than the
    /// last publication, and everything after [`stop`](Self::stop) are
    /// discarded. A failed detection returns the machine to `Idle` so the
    /// next frame can be tried.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<LandmarkSet>, DetectorError>,
    ) -> Completion {
        let in_flight = matches!(self.state, SchedulerState::Detecting(t) if t == ticket);
        let stale = self.last_published.is_some_and(|last| ticket.id <= last);
        if !in_flight || stale {
            self.stats.discarded += 1;
            return Completion::Discarded;
        }

        match result {
            Ok(faces) => {
                self.state = SchedulerState::Publishing(ticket);
                Completion::Publish(Publication { ticket, faces })
            }
            Err(e) => {
                tracing::debug!(error = %e, sequence = ticket.sequence, "detection failed, skipping frame");
                self.stats.failed += 1;
                self.state = SchedulerState::Idle;
                Completion::Discarded
            }
        }
    }

    /// The publication for `ticket` reached its subscribers.
    pub fn published(&mut self, ticket: Ticket) {
        if self.state == SchedulerState::Publishing(ticket) {
            self.last_published = Some(ticket.id);
            self.stats.published += 1;
            self.state = SchedulerState::Idle;
        }
    }

    /// Enter the terminal state; later completions are discarded.
    pub fn stop(&mut self) {
        self.state = SchedulerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Scheduler {
        let mut s = Scheduler::new();
        s.mark_ready();
        s
    }

    fn submit(s: &mut Scheduler, seq: u32) -> Ticket {
        match s.offer(seq, true) {
            Admission::Submit(t) => t,
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn test_not_ready_drops() {
        let mut s = Scheduler::new();
        assert_eq!(s.offer(1, true), Admission::Drop(DropReason::NotReady));
        s.mark_ready();
        assert!(matches!(s.offer(2, true), Admission::Submit(_)));
    }

    #[test]
    fn test_busy_drops_instead_of_queueing() {
        let mut s = ready();
        let t = submit(&mut s, 1);
        assert_eq!(s.offer(2, true), Admission::Drop(DropReason::Busy));
        assert_eq!(s.offer(3, true), Admission::Drop(DropReason::Busy));

        let Completion::Publish(p) = s.complete(t, Ok(vec![])) else {
            panic!("expected publish");
        };
        assert!(p.faces.is_empty());
        assert_eq!(s.offer(4, true), Admission::Drop(DropReason::Busy));
        s.published(p.ticket);

        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(matches!(s.offer(5, true), Admission::Submit(_)));
        assert_eq!(s.stats().dropped, 3);
    }

    #[test]
    fn test_dark_frames_not_submitted() {
        let mut s = ready();
        assert_eq!(s.offer(1, false), Admission::Drop(DropReason::NotFaceCapable));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_failure_returns_to_idle() {
        let mut s = ready();
        let t = submit(&mut s, 1);
        let outcome = s.complete(t, Err(DetectorError::InferenceFailed("boom".into())));
        assert!(matches!(outcome, Completion::Discarded));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert_eq!(s.stats().failed, 1);
        assert!(matches!(s.offer(2, true), Admission::Submit(_)));
    }

    #[test]
    fn test_stop_discards_late_result() {
        let mut s = ready();
        let t = submit(&mut s, 1);
        s.stop();
        assert!(matches!(s.complete(t, Ok(vec![])), Completion::Discarded));
        assert_eq!(s.offer(2, true), Admission::Drop(DropReason::Stopped));
        assert_eq!(s.stats().published, 0);
    }

    #[test]
    fn test_stale_ticket_discarded() {
        let mut s = ready();
        let old = submit(&mut s, 1);
        let Completion::Publish(p) = s.complete(old, Ok(vec![])) else {
            panic!("expected publish");
        };
        s.published(p.ticket);

        let _new = submit(&mut s, 2);
        // A duplicate delivery of the old result must not replace the new one.
        assert!(matches!(s.complete(old, Ok(vec![])), Completion::Discarded));
        assert!(matches!(s.state(), SchedulerState::Detecting(t) if t.sequence == 2));
    }

    /// Frames every `F` ms, detections take `D` ms: over a window `T` at most
    /// ceil(T / D) detections are issued.
    #[test]
    fn test_backpressure_bound() {
        for (frame_ms, detect_ms, window_ms) in [(10u64, 35u64, 1000u64), (16, 50, 2000), (33, 34, 990)] {
            let mut s = ready();
            let mut in_flight: Option<(Ticket, u64)> = None;
            let mut calls = 0u64;
            let mut frames = 0u64;

            let mut t = 0;
            while t < window_ms {
                if let Some((ticket, done_at)) = in_flight {
                    if done_at <= t {
                        if let Completion::Publish(p) = s.complete(ticket, Ok(vec![])) {
                            s.published(p.ticket);
                        }
                        in_flight = None;
                    }
                }
                frames += 1;
                if let Admission::Submit(ticket) = s.offer(frames as u32, true) {
                    calls += 1;
                    in_flight = Some((ticket, t + detect_ms));
                }
                t += frame_ms;
            }

            let bound = window_ms.div_ceil(detect_ms);
            assert!(calls <= bound, "F={frame_ms} D={detect_ms}: {calls} calls > {bound}");
            assert!(calls < frames, "one call per frame is not back-pressure");
        }
    }
}
