//! Prompt compiler: deterministic, bounded-length evaluation prompts.
//!
//! Nothing here reads a clock or a random source. The same entity and
//! material always render the same prompt, so sample-to-sample variance
//! comes only from the model.

use crate::config::PromptLimits;
use crate::models::{CompetencyRequirement, MaterialText, StudentRequirement};

// ═══════════════════════════════════════════════════════════
// Student alignment
// ═══════════════════════════════════════════════════════════

const STUDENT_TASK: &str = "\
TASK:
Evaluate alignment between this worksheet and the student's needs.

You must RETURN a JSON object only with these keys:
- understanding_fit: integer 0-100 (how well the worksheet supports student's academic understanding goals)
- accessibility_fit: integer 0-100 (how accessible is the worksheet given student's challenges)
- accommodation_fit: integer 0-100 (how well accommodations listed would allow success)
- engagement_fit: integer 0-100 (how engaging / motivating the worksheet is for the student)
- overall_alignment: integer 0-100 (summary alignment)
- explanation: short string (1-3 brief sentences explaining top reasons behind the scores)

SCORING RULES:
- Use 0-100 integer values.
- overall_alignment should be close to the average of the four numeric scores (allow 5 points tolerance).
- explanation must be concise.
- Do not output ANY extra text outside the JSON.
- Do not add ANY comments on individual JSON entries.";

/// Render the sampling prompt for one (student, material) pair.
pub fn student_prompt(student: &StudentRequirement, material: &MaterialText, limits: &PromptLimits) -> String {
    let profile = student_profile(student, limits);
    let material_block = material_block(material, limits);

    format!(
        "You are an expert special education analyst. You will evaluate how well a specific \
worksheet aligns with a specific student's IEP.\n\
Follow instructions exactly and return only valid JSON.\n\n\
{profile}\n\n\
{material_block}\n\n\
{STUDENT_TASK}\n\n\
Produce the JSON now.\n"
    )
}

/// Render the consolidation prompt embedding the accepted candidate blobs.
pub fn student_consensus_prompt(
    student: &StudentRequirement,
    material: &MaterialText,
    candidates: &[String],
    limits: &PromptLimits,
) -> String {
    let profile = student_profile(student, limits);
    let blobs = candidate_blobs(candidates);

    format!(
        "You are consolidating multiple candidate JSON evaluations of how well a worksheet \
aligns with a student's IEP.\n\n\
{profile}\n\n\
Worksheet ID: {id}\n\
Worksheet Title: {title}\n\n\
CANDIDATE RESPONSES (each is a JSON object):\n\
{blobs}\n\n\
TASK:\n\
Produce ONE consolidated JSON object with exactly the same keys where:\n\
- each numeric score is a reasoned consensus (e.g., median or trimmed mean), not a copy of one candidate.\n\
- overall_alignment stays within 5 points of the average of the four fit scores.\n\
- explanation is the clearest candidate explanation (1-3 brief sentences).\n\
Return ONLY the JSON object.\n",
        id = material.id,
        title = or_na(&material.title),
    )
}

fn student_profile(student: &StudentRequirement, limits: &PromptLimits) -> String {
    let cap = limits.field_chars;
    format!(
        "STUDENT PROFILE (concise summary):\n\
Name: {name}\n\
Grade: {grade}\n\
Designation: {designation}\n\
Strengths: {strengths}\n\
Challenges: {challenges}\n\
Top goals: {goals}\n\
Key accommodations: {accommodations}",
        name = truncate_chars(&student.name, cap),
        grade = truncate_chars(&student.grade, cap),
        designation = truncate_chars(&student.designation, cap),
        strengths = or_na(&truncate_chars(&student.strengths, cap)),
        challenges = or_na(&truncate_chars(&student.challenges, cap)),
        goals = or_na(&top_entries(&student.education_goals, limits)),
        accommodations = or_na(&top_entries(&student.accommodations, limits)),
    )
}

/// First `profile_entries` entries as `category: text`, joined with `; `.
fn top_entries(entries: &[(String, String)], limits: &PromptLimits) -> String {
    entries
        .iter()
        .take(limits.profile_entries)
        .map(|(k, v)| format!("{k}: {}", truncate_chars(v, limits.field_chars)))
        .collect::<Vec<_>>()
        .join("; ")
}

// ═══════════════════════════════════════════════════════════
// Competency alignment
// ═══════════════════════════════════════════════════════════

const COMPETENCY_ELEMENT_SCHEMA: &str = r#"{
  "id": "<competency_id>",
  "alignment_score": <integer 0-100>,
  "evidence": "<concise (<=160 chars) justification referencing worksheet themes or tasks>",
  "recommendation": "<concise (<=160 chars) actionable improvement to better align>"
}"#;

/// Render the sampling prompt for one material against every competency.
pub fn competency_prompt(
    competencies: &[CompetencyRequirement],
    material: &MaterialText,
    limits: &PromptLimits,
) -> String {
    let block = competency_block(competencies, limits);
    let text = truncate_chars(&material.text, limits.material_chars);

    format!(
        "You are a Canadian curriculum alignment analyst.\n\
Given a worksheet TEXT and a list of COMPETENCIES (curriculum competency statements),\n\
produce a JSON array. Each array element corresponds to one competency and must have:\n\n\
{COMPETENCY_ELEMENT_SCHEMA}\n\n\
Rules:\n\
- alignment_score: judge how strongly the worksheet supports or evidences the competency.\n\
- Use only integer scores 0-100.\n\
- evidence must NOT invent content absent from text.\n\
- recommendation must be actionable and specific.\n\
- Return ONLY valid JSON array. No extra commentary.\n\n\
WORKSHEET:\n\
ID: {id}\n\
Title: {title}\n\
Text (truncated):\n\
{text}\n\n\
COMPETENCIES:\n\
{block}\n\n\
Produce JSON array now.\n",
        id = material.id,
        title = or_na(&material.title),
    )
}

pub fn competency_consensus_prompt(
    competencies: &[CompetencyRequirement],
    material: &MaterialText,
    candidates: &[String],
) -> String {
    let reference = competencies
        .iter()
        .map(|c| format!("- {}: {}", c.id, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let blobs = candidate_blobs(candidates);

    format!(
        "You are consolidating multiple candidate JSON evaluations for worksheet alignment \
to curriculum competencies.\n\n\
Worksheet ID: {id}\n\
Title: {title}\n\n\
COMPETENCIES LIST (reference):\n\
{reference}\n\n\
CANDIDATE RESPONSES (each is a JSON array of competency evaluations):\n\
{blobs}\n\n\
TASK:\n\
Produce ONE consolidated JSON array (same schema) where:\n\
- alignment_score is a reasoned consensus (e.g., median or trimmed mean) and coherent across competencies.\n\
- Select the most precise evidence (avoid repetition).\n\
- Recommendation should combine best actionable suggestion (do not merge conflicting ones; pick most practical).\n\
- Keep evidence and recommendation <=160 chars each.\n\
- Maintain original competency ids.\n\
Return ONLY the JSON array.\n",
        id = material.id,
        title = or_na(&material.title),
    )
}

fn competency_block(competencies: &[CompetencyRequirement], limits: &PromptLimits) -> String {
    let mut lines = Vec::new();
    for c in competencies {
        let mut header = format!("- {}: {}", c.id, c.title);
        if !c.description.is_empty() {
            header.push_str(&format!(" ({})", truncate_chars(&c.description, limits.field_chars)));
        }
        header.push_str(&format!(" [subject={}, grade_band={}]", c.subject, c.grade_band));
        lines.push(header);
        for indicator in c.indicators.iter().take(limits.indicator_lines) {
            lines.push(format!("    * {}", truncate_chars(indicator, limits.field_chars)));
        }
    }
    lines.join("\n")
}

// ═══════════════════════════════════════════════════════════
// Shared
// ═══════════════════════════════════════════════════════════

fn material_block(material: &MaterialText, limits: &PromptLimits) -> String {
    format!(
        "WORKSHEET METADATA:\n\
Worksheet ID: {id}\n\
Worksheet Title: {title}\n\n\
WORKSHEET FULL TEXT:\n\
{text}",
        id = material.id,
        title = or_na(&material.title),
        text = truncate_chars(&material.text, limits.material_chars),
    )
}

fn candidate_blobs(candidates: &[String]) -> String {
    candidates.join("\n\n")
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}

/// First `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_index, _)) => s[..byte_index].to_string(),
        None => s.to_string(),
    }
}
