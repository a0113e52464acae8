/// Sanitize extracted text before passing downstream.
/// Strips control characters (keeping newlines and tabs), trims each line
/// and drops blank lines.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes() {
        let raw = "Fractions\x00Worksheet";
        let clean = sanitize_extracted_text(raw);
        assert!(!clean.contains('\x00'));
        assert_eq!(clean, "FractionsWorksheet");
    }

    #[test]
    fn strips_control_characters() {
        let raw = "Ratio: 3:4\x01\x02\x0c\nDate: 2024-01-15";
        let clean = sanitize_extracted_text(raw);
        assert!(!clean.contains('\x01'));
        assert!(!clean.contains('\x0c'));
        assert!(clean.contains("3:4"));
        assert!(clean.contains("2024-01-15"));
    }

    #[test]
    fn preserves_accents_and_symbols() {
        let raw = "Élève: café ≥ 5 × 2 — «ok»";
        assert_eq!(sanitize_extracted_text(raw), raw);
    }

    #[test]
    fn drops_blank_lines_and_trims() {
        let raw = "  line one  \n\n\t\n   line two\r\n";
        assert_eq!(sanitize_extracted_text(raw), "line one\nline two");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(sanitize_extracted_text(""), "");
        assert_eq!(sanitize_extracted_text("\n\n  \n"), "");
    }
}
