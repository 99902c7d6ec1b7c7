//! Evidence classifier: does any research note carry grounded content?

use copilot_shared::ResearchNote;

/// True iff at least one note is not a not-found placeholder. Empty input is
/// never grounded.
pub fn has_real_evidence(notes: &[ResearchNote]) -> bool {
    notes.iter().any(|note| !note.is_placeholder())
}
