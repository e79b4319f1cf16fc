use anyhow::{anyhow, Result};

use crate::compliance::ClassCounts;
use crate::detect::backend::DetectionSource;
use crate::detect::result::{DetectionRecord, SourceId, SourceReport};

/// Stub source for tests and demos. Returns the same scripted report for every frame.
pub struct StubSource {
    id: SourceId,
    report: SourceReport,
    failure: Option<String>,
    warm_up_failure: Option<String>,
    calls: u64,
    warm_ups: u64,
}

impl StubSource {
    pub fn new(id: impl Into<SourceId>, report: SourceReport) -> Self {
        Self {
            id: id.into(),
            report,
            failure: None,
            warm_up_failure: None,
            calls: 0,
            warm_ups: 0,
        }
    }

    pub fn empty(id: impl Into<SourceId>) -> Self {
        Self::new(id, SourceReport::default())
    }

    pub fn with_records(id: impl Into<SourceId>, records: Vec<DetectionRecord>) -> Self {
        Self::new(id, SourceReport::Boxes(records))
    }

    pub fn with_summary(id: impl Into<SourceId>, counts: ClassCounts) -> Self {
        Self::new(id, SourceReport::Summary(counts))
    }

    /// A source whose every call fails with `message`.
    pub fn failing(id: impl Into<SourceId>, message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::empty(id)
        }
    }

    /// Make `warm_up` fail with `message`; `detect` is unaffected.
    pub fn with_warm_up_failure(mut self, message: &str) -> Self {
        self.warm_up_failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn warm_ups(&self) -> u64 {
        self.warm_ups
    }
}

impl DetectionSource for StubSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<SourceReport> {
        self.calls += 1;
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.report.clone())
    }

    fn warm_up(&mut self) -> Result<()> {
        self.warm_ups += 1;
        match &self.warm_up_failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}
