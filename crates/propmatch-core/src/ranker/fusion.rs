/// Final score fusion, kept in one place as a pure function over
/// `(llm_score, hybrid_base) -> (final, method_label)` per branch, each
/// with its own unit test. This is the "AI-dominant" variant; the
/// normalization-first variant that also exists upstream is intentionally
/// not reintroduced here.
pub fn fuse(llm_score: f64, hybrid_base: f64) -> (f64, &'static str) {
    let (raw, label) = if llm_score >= 85.0 {
        if hybrid_base >= 75.0 {
            (llm_score + 2.0, "ai_excellent_with_hybrid_boost")
        } else {
            (llm_score, "ai_excellent_trusted")
        }
    } else if llm_score >= 70.0 {
        if hybrid_base >= 70.0 {
            (0.7 * llm_score + 0.3 * hybrid_base + 3.0, "ai_good_hybrid_confirmed")
        } else {
            (0.8 * llm_score + 0.2 * hybrid_base, "ai_good_mostly_trusted")
        }
    } else if llm_score >= 50.0 {
        (0.6 * llm_score + 0.4 * hybrid_base, "ai_hybrid_balanced")
    } else if llm_score > 30.0 {
        (0.65 * llm_score + 0.35 * hybrid_base, "ai_moderate_blend")
    } else if hybrid_base <= 40.0 {
        (llm_score, "ai_poor_trusted")
    } else {
        (0.8 * llm_score + 0.2 * hybrid_base, "ai_poor_mostly_trusted")
    };

    let clamped = raw.clamp(10.0, 100.0);
    let rounded = (clamped * 10.0).round() / 10.0;
    (rounded, label)
}
