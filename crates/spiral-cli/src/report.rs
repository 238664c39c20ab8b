//! Human-readable mission summary for the terminal.

use spiral_core::Mission;

/// One line describing the planned mission, e.g.
/// `4 slices, 332 waypoints (6 safety), 25.0 min/battery, 2 warnings`.
pub fn summary_line(mission: &Mission) -> String {
    let safety: usize = mission.slices.iter().map(|s| s.safety_waypoints).sum();
    let minutes = mission
        .slices
        .iter()
        .map(|s| s.estimated_minutes)
        .fold(0.0_f64, f64::max);
    let mut line = format!(
        "{} slices, {} waypoints ({} safety), {:.1} min/battery, {} warnings",
        mission.slices.len(),
        mission.total_waypoints(),
        safety,
        minutes,
        mission.warnings.len()
    );
    if mission.has_unverified_segments() {
        line.push_str(", terrain partly unverified");
    }
    line
}
