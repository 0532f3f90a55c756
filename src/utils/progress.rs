use std::io::{self, Write};

const BAR_WIDTH: usize = 30;

/// Batch progress line for one epoch, drawn in place on stderr.
///
/// Carries the latest batch loss so long epochs give feedback before the
/// epoch summary prints.
pub struct ProgressBar {
    label: String,
    total_batches: usize,
    done: usize,
    last_loss: Option<f32>,
}

impl ProgressBar {
    #[must_use]
    pub fn new(total_batches: usize, label: &str) -> Self {
        Self {
            label: label.to_string(),
            total_batches,
            done: 0,
            last_loss: None,
        }
    }

    /// Advance one batch and redraw with its loss.
    pub fn step(&mut self, loss: f32) {
        self.done += 1;
        self.last_loss = Some(loss);
        self.draw();
    }

    /// Clear the line so the epoch summary starts clean.
    pub fn finish(&self) {
        eprint!("\r{}\r", " ".repeat(self.line_width()));
        let _ = io::stderr().flush();
    }

    fn line_width(&self) -> usize {
        // label + bar + counters + loss readout, padded generously
        self.label.len() + BAR_WIDTH + 40
    }

    fn draw(&self) {
        let filled = if self.total_batches > 0 {
            (self.done * BAR_WIDTH / self.total_batches).min(BAR_WIDTH)
        } else {
            BAR_WIDTH
        };
        let head = if filled < BAR_WIDTH { ">" } else { "" };
        let bar = format!(
            "{}{}{}",
            "=".repeat(filled),
            head,
            " ".repeat(BAR_WIDTH - filled - head.len())
        );

        match self.last_loss {
            Some(loss) => eprint!(
                "\r{} [{}] {}/{} loss {:.4}",
                self.label, bar, self.done, self.total_batches, loss
            ),
            None => eprint!(
                "\r{} [{}] {}/{}",
                self.label, bar, self.done, self.total_batches
            ),
        }
        let _ = io::stderr().flush();
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counts_batches() {
        let mut bar = ProgressBar::new(3, "epoch 1");
        bar.step(1.0);
        bar.step(0.5);
        assert_eq!(bar.done, 2);
        assert_eq!(bar.last_loss, Some(0.5));
    }

    #[test]
    fn test_zero_total_does_not_panic() {
        let mut bar = ProgressBar::new(0, "empty");
        bar.step(0.0);
        bar.finish();
    }
}
