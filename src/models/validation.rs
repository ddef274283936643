use serde::Serialize;

/// Verdict produced by the file validators for one upload.
///
/// `security_score` starts at 100; each error costs 50 points and each
/// warning 10, floored at 0.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub security_score: u8,
}

impl ValidationResult {
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        let penalty = errors.len() * 50 + warnings.len() * 10;
        Self {
            is_valid: errors.is_empty(),
            security_score: 100usize.saturating_sub(penalty) as u8,
            errors,
            warnings,
        }
    }

    pub fn valid() -> Self {
        Self::from_findings(Vec::new(), Vec::new())
    }
}
