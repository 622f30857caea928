//! Video host callbacks.
//!
//! Presentation and progress reporting supplied by the host, invoked
//! synchronously from the playback thread.

/// Callbacks the engine drives while a stream is open.
///
/// All methods run on the playback thread's timing-critical path and must
/// return promptly; a blocking implementation stalls the pacing loop.
#[cfg_attr(test, mockall::automock)]
pub trait VideoHost: Send + Sync {
    /// Present the frame the decoder has prepared.
    fn present_frame(&self);

    /// Paint the overlay blank (no video).
    fn render_blank_frame(&self);

    /// Progress of a long-running parse or precache pass.
    ///
    /// `-1.0` announces that a new pass is starting, followed by
    /// non-decreasing fractions in `(0, 1)`, then exactly one `1.0` on
    /// completion.
    fn report_parse_progress(&self, fraction: f64);

    /// Stream dimensions, reported once per successful open.
    fn report_dimensions(&self, width: u32, height: u32);
}

/// Host that ignores every callback.
#[derive(Debug, Default)]
pub struct NullVideoHost;

impl VideoHost for NullVideoHost {
    fn present_frame(&self) {}

    fn render_blank_frame(&self) {}

    fn report_parse_progress(&self, _fraction: f64) {}

    fn report_dimensions(&self, _width: u32, _height: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_host_records_dimension_report() {
        let mut host = MockVideoHost::new();
        host.expect_report_dimensions()
            .withf(|w, h| *w == 720 && *h == 480)
            .times(1)
            .return_const(());
        host.report_dimensions(720, 480);
    }

    #[test]
    fn null_host_accepts_all_callbacks() {
        let host = NullVideoHost;
        host.present_frame();
        host.render_blank_frame();
        host.report_parse_progress(-1.0);
        host.report_parse_progress(1.0);
        host.report_dimensions(320, 240);
    }
}
