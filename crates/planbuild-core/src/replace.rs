//! Replacement application

use crate::error::ReplacementError;
use crate::types::Replacement;

/// Apply replacements to `baseline` in order
///
/// Each replacement rewrites the first occurrence of its `old` text in the
/// content produced by the previous one. An empty `old` only matches empty
/// content.
///
/// # Errors
/// `ReplacementError::NotFound` on the first replacement whose target is
/// missing
pub fn apply_replacements(
    baseline: &str,
    replacements: &[Replacement],
) -> Result<String, ReplacementError> {
    let mut content = baseline.to_owned();

    for replacement in replacements {
        if replacement.old.is_empty() {
            if !content.is_empty() {
                return Err(ReplacementError::NotFound { old: String::new() });
            }
            content.clone_from(&replacement.new);
            continue;
        }

        let Some(start) = content.find(&replacement.old) else {
            return Err(ReplacementError::NotFound {
                old: replacement.old.clone(),
            });
        };
        content.replace_range(start..start + replacement.old.len(), &replacement.new);
    }

    Ok(content)
}
