use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Lifecycle of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Indexing = 1,
    Matching = 2,
    Cancelled = 3,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Indexing,
            2 => ScanState::Matching,
            3 => ScanState::Cancelled,
            _ => ScanState::Idle,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, ScanState::Indexing | ScanState::Matching)
    }
}

/// Work units of one scan: one per file indexed, one per entry matched.
#[derive(Debug)]
pub struct ScanProgress {
    visited: AtomicUsize,
    total: usize,
    state: AtomicU8,
}

impl ScanProgress {
    pub fn new(total: usize) -> Self {
        Self {
            visited: AtomicUsize::new(0),
            total,
            state: AtomicU8::new(ScanState::Idle as u8),
        }
    }

    pub fn visit(&self) {
        self.visited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn visited(&self) -> usize {
        self.visited.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `next`. A cancelled scan may only go back to idle.
    pub fn advance(&self, next: ScanState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current = ScanState::from_u8(current);
                if current == ScanState::Cancelled && next != ScanState::Idle {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }

    /// 0..=100; at least 1 while running so a started scan never reads as
    /// idle, 0 otherwise.
    pub fn percent(&self) -> u8 {
        if !self.state().is_active() || self.total == 0 {
            return 0;
        }
        let percent = 100 * self.visited() / self.total;
        percent.clamp(1, 100) as u8
    }
}

/// Terminal progress bar fed from [`ScanProgress::percent`].
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(100);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    pub fn update(&self, percent: u8, state: ScanState) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(match state {
            ScanState::Indexing => "indexing source files",
            ScanState::Matching => "matching resource keys",
            ScanState::Cancelled => "cancelling",
            ScanState::Idle => "",
        });
    }

    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    pub fn abandon(&self, message: String) {
        self.bar.abandon_with_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_zero_when_idle() {
        let progress = ScanProgress::new(10);
        progress.visit();
        assert_eq!(progress.percent(), 0);
    }

    #[test]
    fn test_percent_is_at_least_one_while_running() {
        let progress = ScanProgress::new(1000);
        progress.advance(ScanState::Indexing);
        assert_eq!(progress.percent(), 1);

        for _ in 0..500 {
            progress.visit();
        }
        assert_eq!(progress.percent(), 50);
    }

    #[test]
    fn test_percent_with_no_units() {
        let progress = ScanProgress::new(0);
        progress.advance(ScanState::Matching);
        assert_eq!(progress.percent(), 0);
    }

    #[test]
    fn test_cancelled_only_returns_to_idle() {
        let progress = ScanProgress::new(1);
        assert!(progress.advance(ScanState::Indexing));
        assert!(progress.advance(ScanState::Cancelled));
        assert!(!progress.advance(ScanState::Matching));
        assert_eq!(progress.state(), ScanState::Cancelled);
        assert!(progress.advance(ScanState::Idle));
        assert_eq!(progress.state(), ScanState::Idle);
    }
}
