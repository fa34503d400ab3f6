//! Job details descriptor and the deduplication signature.

use serde::{Deserialize, Serialize};

/// Descriptor of the user code a job will invoke.
///
/// The class/method/argument triple identifies *what* the job does and is
/// the basis of the deduplication signature: two jobs with the same details
/// produce the same signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobDetails {
    /// Fully qualified name of the type declaring the method.
    pub class_name: String,
    /// Name of the method to invoke.
    pub method_name: String,
    /// Serialized argument values, in declaration order.
    #[serde(default)]
    pub args: Vec<String>,
}

impl JobDetails {
    /// Create a new job details descriptor.
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            args,
        }
    }

    /// Return the stable deduplication signature: `class.method(arg,…)`.
    ///
    /// The signature is used as a set member in the signature-by-state
    /// indexes, so it must be deterministic for equal details.
    pub fn signature(&self) -> String {
        format!(
            "{}.{}({})",
            self.class_name,
            self.method_name,
            self.args.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable() {
        let details = JobDetails::new(
            "com.acme.Reports",
            "generateWeekly",
            vec!["42".to_string(), "true".to_string()],
        );
        assert_eq!(details.signature(), "com.acme.Reports.generateWeekly(42,true)");
        assert_eq!(details.signature(), details.clone().signature());
    }

    #[test]
    fn test_signature_without_args() {
        let details = JobDetails::new("com.acme.Cleanup", "run", Vec::new());
        assert_eq!(details.signature(), "com.acme.Cleanup.run()");
    }
}
