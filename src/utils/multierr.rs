use std::error::Error;
use std::fmt;

use crate::downloader::ItemFailure;
use crate::progress::Stage;

/// Every item a run failed on, reported as one error grouped by stage.
#[derive(Debug)]
pub struct MultiError {
    failures: Vec<ItemFailure>,
}

impl MultiError {
    pub fn new(failures: Vec<ItemFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    pub fn in_stage(&self, stage: Stage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.failures.len() == 1 { "track" } else { "tracks" };
        write!(f, "{} {} failed", self.failures.len(), noun)?;
        for stage in [Stage::Resolve, Stage::Download] {
            let mut failures = self.in_stage(stage).peekable();
            if failures.peek().is_none() {
                continue;
            }
            write!(f, "\n  while {}:", stage.label())?;
            for failure in failures {
                write!(f, "\n    - {}: {}", failure.url, failure.error)?;
            }
        }
        Ok(())
    }
}

impl Error for MultiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failures.first().map(|f| f as &dyn Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error as TrackError;

    fn failure(stage: Stage, url: &str) -> ItemFailure {
        ItemFailure::new(
            stage,
            url,
            TrackError::Timeout {
                url: url.to_string(),
            },
        )
    }

    #[test]
    fn test_display_groups_by_stage() {
        let err = MultiError::new(vec![
            failure(Stage::Download, "http://x/a.mp3"),
            failure(Stage::Resolve, "http://x/page/b"),
            failure(Stage::Download, "http://x/c.mp3"),
        ]);
        assert_eq!(err.len(), 3);
        assert_eq!(err.in_stage(Stage::Download).count(), 2);
        assert_eq!(
            err.to_string(),
            "3 tracks failed\n  while resolving:\n    - http://x/page/b: request to http://x/page/b timed out\n  while downloading:\n    - http://x/a.mp3: request to http://x/a.mp3 timed out\n    - http://x/c.mp3: request to http://x/c.mp3 timed out"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_single_stage_has_no_empty_group() {
        let err = MultiError::new(vec![failure(Stage::Download, "http://x/a.mp3")]);
        assert_eq!(
            err.to_string(),
            "1 track failed\n  while downloading:\n    - http://x/a.mp3: request to http://x/a.mp3 timed out"
        );
    }

    #[test]
    fn test_empty() {
        let err = MultiError::new(Vec::new());
        assert!(err.is_empty());
        assert!(err.source().is_none());
    }
}
