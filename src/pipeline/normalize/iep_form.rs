//! Parser for the plain text of an IEP form.
//!
//! The form is a sequence of `KEY: value` scalars followed by upper-case
//! section headers (`PERFORMANCE_PROGRESS`, `EDUCATION_GOALS`, ...). Goal and
//! accommodation sections contain labelled sub-fields (`ACADEMIC:`, ...).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const SECTION_HEADERS: [&str; 6] = [
    "PERFORMANCE_PROGRESS",
    "EDUCATION_GOALS",
    "ACCOMMODATIONS",
    "ASSESSMENTS",
    "TRANSITION_GOALS",
    "PARTICIPANTS",
];

const GOAL_LABELS: [&str; 5] = ["ACADEMIC", "SOCIAL", "BEHAVIOURAL", "COMMUNICATIVE", "PHYSICAL"];
const ACCOMMODATION_LABELS: [&str; 4] = ["INSTRUCTIONAL", "ENVIRONMENTAL", "ASSESSMENT", "TECHNOLOGY"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IepStudent {
    pub student_name: String,
    pub grade: String,
    pub date_of_birth: String,
    pub teacher: String,
    pub pen: String,
    pub school: String,
    pub designation: String,
    pub iep_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub role: String,
}

/// Structured IEP record, serializable to the student JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IepForm {
    pub student: IepStudent,
    pub performance_progress: String,
    pub education_goals: Map<String, Value>,
    pub accommodations: Map<String, Value>,
    pub assessments: String,
    pub transition_goals: String,
    pub participants: Vec<Participant>,
}

impl IepForm {
    /// True when nothing recognizable was found in the text.
    pub fn is_blank(&self) -> bool {
        self.student == IepStudent::default()
            && self.performance_progress.is_empty()
            && self.assessments.is_empty()
            && self.transition_goals.is_empty()
            && self.participants.is_empty()
            && all_empty(&self.education_goals)
            && all_empty(&self.accommodations)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn all_empty(map: &Map<String, Value>) -> bool {
    map.values().all(|v| v.as_str().map_or(true, str::is_empty))
}

/// Parse IEP form text. Missing fields come back empty.
pub fn parse_iep_text(text: &str) -> IepForm {
    let lines = normalize_lines(text);
    let mut used = HashSet::new();
    let mut scalar = |key: &str| extract_scalar(&lines, key, &mut used);

    let student = IepStudent {
        student_name: scalar("STUDENT NAME"),
        grade: scalar("GRADE"),
        date_of_birth: scalar("DATE OF BIRTH"),
        teacher: scalar("TEACHER"),
        pen: scalar("PEN"),
        school: scalar("SCHOOL"),
        designation: scalar("DESIGNATION"),
        iep_date: scalar("IEP DATE"),
    };

    let block = |header: &str| extract_block(&lines, header);

    IepForm {
        student,
        performance_progress: block("PERFORMANCE_PROGRESS"),
        education_goals: labeled_subfields(&block("EDUCATION_GOALS"), &GOAL_LABELS),
        accommodations: labeled_subfields(&block("ACCOMMODATIONS"), &ACCOMMODATION_LABELS),
        assessments: block("ASSESSMENTS"),
        transition_goals: block("TRANSITION_GOALS"),
        participants: parse_participants(&block("PARTICIPANTS")),
    }
}

/// Collapse whitespace runs and drop empty lines.
fn normalize_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|raw| WHITESPACE_RUN.replace_all(raw, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// `KEY: value`, or `KEY:` with the value on the next line.
///
/// Lines already consumed are skipped, so a repeated key (a second
/// `IEP DATE`) does not shadow the first.
fn extract_scalar(lines: &[String], key: &str, used: &mut HashSet<usize>) -> String {
    let prefix = format!("{}:", key.to_uppercase());
    for (i, line) in lines.iter().enumerate() {
        if used.contains(&i) || !line.to_uppercase().starts_with(&prefix) {
            continue;
        }
        let value = line.split_once(':').map(|(_, v)| v.trim()).unwrap_or("");
        if !value.is_empty() {
            used.insert(i);
            return value.to_string();
        }
        if let Some(next) = lines.get(i + 1) {
            used.insert(i);
            used.insert(i + 1);
            return next.trim().to_string();
        }
    }
    String::new()
}

/// Headers compare without spaces or underscores, case-insensitively.
fn header_key(s: &str) -> String {
    s.chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect::<String>()
        .to_uppercase()
}

/// Lines between `header` and the next section header.
fn extract_block(lines: &[String], header: &str) -> String {
    let target = header_key(header);
    let stops: HashSet<String> = SECTION_HEADERS
        .iter()
        .filter(|h| **h != header)
        .map(|h| header_key(h))
        .collect();

    let Some(start) = lines.iter().position(|l| header_key(l) == target) else {
        return String::new();
    };
    let end = lines[start + 1..]
        .iter()
        .position(|l| stops.contains(&header_key(l)))
        .map_or(lines.len(), |offset| start + 1 + offset);

    lines[start + 1..end].join("\n").trim().to_string()
}

/// Sub-blocks under `LABEL:` lines. Every label is present in the result
/// (lower-cased, in label order), empty when absent from the form.
fn labeled_subfields(block: &str, labels: &[&str]) -> Map<String, Value> {
    let mut texts: Vec<(String, Vec<&str>)> = labels
        .iter()
        .map(|l| (l.to_lowercase(), Vec::new()))
        .collect();

    let mut current: Option<usize> = None;
    for line in block.lines() {
        let stripped = line.trim();
        let upper = stripped.trim_end_matches(':').to_uppercase();
        if let Some(index) = labels.iter().position(|l| *l == upper) {
            current = Some(index);
            // A repeated label restarts its buffer.
            texts[index].1.clear();
        } else if let Some(index) = current {
            texts[index].1.push(stripped);
        }
    }

    texts
        .into_iter()
        .map(|(label, lines)| (label, Value::String(lines.join("\n").trim().to_string())))
        .collect()
}

/// `Name - Role`, one per line.
fn parse_participants(block: &str) -> Vec<Participant> {
    block
        .lines()
        .filter_map(|line| {
            let (name, role) = line.split_once('-')?;
            let name = name.trim();
            (!name.is_empty()).then(|| Participant {
                name: name.to_string(),
                role: role.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = "\
INDIVIDUAL EDUCATION PLAN
STUDENT NAME:   Maya   Chen
GRADE: 7
DATE OF BIRTH:
2012-04-09
TEACHER: Ms. Patel
PEN: 123456789
SCHOOL: Riverside Middle
DESIGNATION: Autism Spectrum Disorder
IEP DATE: 2024-09-15
IEP DATE: 2025-01-10

PERFORMANCE_PROGRESS
Maya is strong at pattern recognition.
She becomes overwhelmed by noise.
EDUCATION GOALS
ACADEMIC:
Solve two-step ratio problems.
SOCIAL:
Participate in small-group work.
ACCOMMODATIONS
INSTRUCTIONAL:
Chunk multi-step instructions.
ENVIRONMENTAL:
Quiet workspace.
TECHNOLOGY:
ASSESSMENTS
Extended time on tests.
TRANSITION_GOALS
Prepare for grade 8 rotation.
PARTICIPANTS
Ms. Patel - Classroom Teacher
Mr. Lee - Learning Support - Case Manager
- nobody
";

    #[test]
    fn parses_scalars() {
        let form = parse_iep_text(FORM);
        assert_eq!(form.student.student_name, "Maya Chen");
        assert_eq!(form.student.grade, "7");
        assert_eq!(form.student.date_of_birth, "2012-04-09");
        assert_eq!(form.student.teacher, "Ms. Patel");
        assert_eq!(form.student.designation, "Autism Spectrum Disorder");
        assert_eq!(form.student.iep_date, "2024-09-15");
    }

    #[test]
    fn parses_blocks_with_space_insensitive_headers() {
        let form = parse_iep_text(FORM);
        assert_eq!(
            form.performance_progress,
            "Maya is strong at pattern recognition.\nShe becomes overwhelmed by noise."
        );
        assert_eq!(form.education_goals["academic"], "Solve two-step ratio problems.");
        assert_eq!(form.education_goals["social"], "Participate in small-group work.");
        assert_eq!(form.education_goals["physical"], "");
        assert_eq!(form.accommodations["environmental"], "Quiet workspace.");
        assert_eq!(form.accommodations["technology"], "");
        assert_eq!(form.assessments, "Extended time on tests.");
        assert_eq!(form.transition_goals, "Prepare for grade 8 rotation.");
    }

    #[test]
    fn labels_keep_declared_order() {
        let form = parse_iep_text(FORM);
        let keys: Vec<&String> = form.education_goals.keys().collect();
        assert_eq!(keys, vec!["academic", "social", "behavioural", "communicative", "physical"]);
    }

    #[test]
    fn participants_split_on_first_dash() {
        let form = parse_iep_text(FORM);
        assert_eq!(form.participants.len(), 2);
        assert_eq!(form.participants[1].name, "Mr. Lee");
        assert_eq!(form.participants[1].role, "Learning Support - Case Manager");
    }

    #[test]
    fn empty_text_is_blank() {
        let form = parse_iep_text("");
        assert!(form.is_blank());
        assert!(!parse_iep_text(FORM).is_blank());
    }

    #[test]
    fn json_shape_matches_student_record() {
        let json = parse_iep_text(FORM).to_json();
        assert_eq!(json["student"]["student_name"], "Maya Chen");
        assert!(json["education_goals"].is_object());
        assert!(json["participants"].is_array());
    }
}
