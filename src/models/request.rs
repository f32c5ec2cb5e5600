use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestLevel {
    #[default]
    RunSpecifiedTests,
    RunLocalTests,
    RunAllTestsInOrg,
}

impl TestLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestLevel::RunSpecifiedTests => "RunSpecifiedTests",
            TestLevel::RunLocalTests => "RunLocalTests",
            TestLevel::RunAllTestsInOrg => "RunAllTestsInOrg",
        }
    }
}

/// What to run and how much of the pipeline to drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunRequest {
    /// Test classes in submission order, without duplicates.
    pub class_names: Vec<String>,
    pub level: TestLevel,
    pub collect_coverage: bool,
    pub wait_for_completion: bool,
}

impl TestRunRequest {
    /// Run the named classes, waiting for completion and collecting coverage.
    pub fn specified<I, S>(class_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in class_names {
            let name = name.into().trim().to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Self {
            class_names: names,
            level: TestLevel::RunSpecifiedTests,
            collect_coverage: true,
            wait_for_completion: true,
        }
    }

    pub fn with_level(mut self, level: TestLevel) -> Self {
        self.level = level;
        self
    }

    pub fn collect_coverage(mut self, collect: bool) -> Self {
        self.collect_coverage = collect;
        self
    }

    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.level == TestLevel::RunSpecifiedTests && self.class_names.is_empty() {
            return Err(Error::InvalidRequest(
                "RunSpecifiedTests requires at least one class name".into(),
            ));
        }
        for name in &self.class_names {
            if !is_identifier(name) {
                return Err(Error::InvalidRequest(format!(
                    "'{}' is not a valid class name",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Letters, digits and underscores, starting with a letter. A single
/// `namespace.` prefix is allowed.
pub fn is_identifier(name: &str) -> bool {
    let mut parts = name.split('.');
    let valid = |part: &str| {
        part.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => valid(name),
        (Some(ns), Some(name), None) => valid(ns) && valid(name),
        _ => false,
    }
}
