//! Change-oracle hints.
//!
//! A running daemon can report which output globs changed since the last
//! known-good cache write, letting the run cache skip restoration work. The
//! engine only speaks the interface; when no daemon is reachable the no-op
//! implementation reports everything changed, which is always safe.

use tracing::warn;

use turbine_core::{Result, TaskOutputs};

/// Globs cross the wire unix-style with `:` escaped. These are repository
/// relative globs, so no Windows drive letters carry their own `:`.
pub fn format_repo_relative_glob(input: &str) -> String {
    input.replace('\\', "/").replace(':', "\\:")
}

pub trait OutputWatcher: Send + Sync {
    /// Which of the given output globs changed since the cache write for
    /// `hash`, plus the time the cached artifact originally saved.
    fn changed_outputs(&self, hash: &str, output_globs: &[String]) -> Result<(Vec<String>, u64)>;

    /// Tell the oracle a fresh artifact now covers these globs.
    fn notify_outputs_written(
        &self,
        hash: &str,
        outputs: &TaskOutputs,
        time_saved: u64,
    ) -> Result<()>;
}

/// The fallback when no daemon is available: every glob is always
/// considered changed and notifications vanish.
pub struct NoopWatcher;

impl OutputWatcher for NoopWatcher {
    fn changed_outputs(&self, _hash: &str, output_globs: &[String]) -> Result<(Vec<String>, u64)> {
        Ok((output_globs.to_vec(), 0))
    }

    fn notify_outputs_written(
        &self,
        _hash: &str,
        _outputs: &TaskOutputs,
        _time_saved: u64,
    ) -> Result<()> {
        Ok(())
    }
}

/// Ask the watcher, degrading RPC errors to "all globs changed".
pub fn changed_outputs_or_all(
    watcher: &dyn OutputWatcher,
    hash: &str,
    output_globs: &[String],
) -> (Vec<String>, u64) {
    let escaped: Vec<String> = output_globs
        .iter()
        .map(|g| format_repo_relative_glob(g))
        .collect();
    match watcher.changed_outputs(hash, &escaped) {
        Ok(result) => result,
        Err(err) => {
            warn!(%hash, "output watcher unavailable, assuming all outputs changed: {err}");
            (escaped, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globs_are_unix_style_with_escaped_colons() {
        assert_eq!(format_repo_relative_glob("dist/**"), "dist/**");
        assert_eq!(
            format_repo_relative_glob("dist\\win\\path"),
            "dist/win/path"
        );
        assert_eq!(format_repo_relative_glob("a:b/glob"), "a\\:b/glob");
    }

    #[test]
    fn noop_watcher_reports_everything_changed() {
        let globs = vec!["pkg/dist/**".to_string()];
        let (changed, time_saved) = NoopWatcher.changed_outputs("abc", &globs).unwrap();
        assert_eq!(changed, globs);
        assert_eq!(time_saved, 0);
    }

    struct BrokenWatcher;
    impl OutputWatcher for BrokenWatcher {
        fn changed_outputs(&self, _: &str, _: &[String]) -> Result<(Vec<String>, u64)> {
            Err(turbine_core::Error::network("daemon", "socket closed"))
        }
        fn notify_outputs_written(&self, _: &str, _: &TaskOutputs, _: u64) -> Result<()> {
            Err(turbine_core::Error::network("daemon", "socket closed"))
        }
    }

    #[test]
    fn watcher_errors_degrade_to_all_changed() {
        let globs = vec!["pkg/dist/**".to_string()];
        let (changed, _) = changed_outputs_or_all(&BrokenWatcher, "abc", &globs);
        assert_eq!(changed, globs);
    }
}
