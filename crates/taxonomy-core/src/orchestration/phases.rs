//! The five-phase (eight-checkpoint) run sequence (spec §4.L).

/// Canonical phase names, in execution order. `phase4_resume` is a checkpoint
/// boundary rather than a data-producing stage: by default it performs no
/// work beyond recording that resume-eligibility was reached.
pub const PHASES: &[&str] = &[
    "phase1_level0",
    "phase1_level1",
    "phase1_level2",
    "phase1_level3",
    "phase2_consolidation",
    "phase3_post_processing",
    "phase4_resume",
    "phase5_finalization",
];

/// Index of `phase` within [`PHASES`], if it is a known phase name.
#[must_use]
pub fn phase_index(phase: &str) -> Option<usize> {
    PHASES.iter().position(|p| *p == phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_index_finds_known_phases() {
        assert_eq!(phase_index("phase1_level0"), Some(0));
        assert_eq!(phase_index("phase5_finalization"), Some(7));
        assert_eq!(phase_index("bogus"), None);
    }
}
