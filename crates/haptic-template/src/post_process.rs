//! Per-template post-processing pipelines

use regex::Regex;

use haptic_config::PostProcessorSpec;
use haptic_core::{Error, Result};

/// A compiled post-processor pipeline, applied in configured order.
#[derive(Debug)]
pub struct PostProcessorPipeline {
    stages: Vec<CompiledStage>,
}

#[derive(Debug)]
enum CompiledStage {
    RegexReplace { pattern: Regex, replacement: String },
}

impl PostProcessorPipeline {
    pub fn compile(specs: &[PostProcessorSpec]) -> Result<Self> {
        let mut stages = Vec::with_capacity(specs.len());
        for spec in specs {
            let PostProcessorSpec::RegexReplace {
                pattern,
                replacement,
            } = spec;
            let pattern = Regex::new(pattern)
                .map_err(|e| Error::config(format!("invalid post-processor pattern: {e}")))?;
            stages.push(CompiledStage::RegexReplace {
                pattern,
                replacement: replacement.clone(),
            });
        }
        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the rendered text through every stage, line by line.
    pub fn apply(&self, input: String) -> String {
        let mut output = input;
        for stage in &self.stages {
            let CompiledStage::RegexReplace {
                pattern,
                replacement,
            } = stage;
            output = output
                .split('\n')
                .map(|line| pattern.replace_all(line, replacement.as_str()).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
        }
        output
    }
}
