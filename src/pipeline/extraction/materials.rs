//! Material collection: walks worksheet directories and extracts each file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::orchestrator::DocumentExtractor;
use super::types::DocumentFormat;
use crate::models::{disambiguate_ids, MaterialText};

/// Group label for a material given as a single file.
pub const SINGLE_UNIT_GROUP: &str = "single_unit";

/// Collect every `.pdf` / `.txt` under `root` (a file, a flat directory, or a
/// directory of unit sub-directories), in a stable name-sorted order.
///
/// Ids are `{group}_{path within group}`, so files directly under `root` are
/// prefixed with the root's name. Ids are unique within the returned list.
/// Extraction failures leave the material with empty text; it is still returned.
pub fn collect_materials(root: &Path, extractor: &DocumentExtractor) -> Vec<MaterialText> {
    if root.is_file() {
        if DocumentFormat::detect(root).is_none() {
            tracing::debug!(path = %root.display(), "Skipping unsupported material file");
            return Vec::new();
        }
        let name = file_name(root);
        return vec![build_material(root, name.clone(), name, SINGLE_UNIT_GROUP.to_string(), extractor)];
    }

    let root_name = file_name(&std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()));
    let mut files = Vec::new();
    walk_supported_files(root, &mut files);

    let materials = files
        .into_iter()
        .filter_map(|path| {
            let rel = path.strip_prefix(root).ok()?.to_path_buf();
            let (id, group) = match first_dir_component(&rel) {
                Some(group) => (material_id(&rel), group),
                None => (material_id(&Path::new(&root_name).join(&rel)), root_name.clone()),
            };
            Some(build_material(&path, id, file_name(&path), group, extractor))
        })
        .collect();
    merge_materials(materials)
}

/// Collect the selected units of each course under `curriculum_root`.
///
/// Identifiers are relative to `curriculum_root`, so equally named files in
/// different courses or units stay distinct. Missing courses/units are skipped.
pub fn collect_selection(
    curriculum_root: &Path,
    selection: &[(String, Vec<String>)],
    extractor: &DocumentExtractor,
) -> Vec<MaterialText> {
    let mut merged = Vec::new();

    for (course, units) in selection {
        let course_dir = curriculum_root.join(course);
        if !course_dir.is_dir() {
            tracing::warn!(course = %course, "Selected course not found, skipping");
            continue;
        }
        for unit in units {
            let unit_dir = course_dir.join(unit);
            if !unit_dir.exists() {
                tracing::warn!(course = %course, unit = %unit, "Selected unit not found, skipping");
                continue;
            }
            let mut files = Vec::new();
            if unit_dir.is_file() {
                files.push(unit_dir.clone());
            } else {
                walk_supported_files(&unit_dir, &mut files);
            }
            for path in files {
                let Ok(rel) = path.strip_prefix(curriculum_root) else {
                    continue;
                };
                merged.push(build_material(&path, material_id(rel), file_name(&path), unit.clone(), extractor));
            }
        }
    }

    merge_materials(merged)
}

/// Merge several files or directories. See [`merge_materials`].
pub fn collect_paths(paths: &[PathBuf], extractor: &DocumentExtractor) -> Vec<MaterialText> {
    let mut merged = Vec::new();
    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Material path does not exist, skipping");
            continue;
        }
        merged.extend(collect_materials(path, extractor));
    }
    merge_materials(merged)
}

/// Drop repeated files (same path reached twice) and make the remaining ids
/// unique in order: a second `unit1_x.txt` becomes `unit1_x.txt (2)`.
pub fn merge_materials(materials: Vec<MaterialText>) -> Vec<MaterialText> {
    let mut seen_paths = HashSet::new();
    let mut merged: Vec<MaterialText> = materials
        .into_iter()
        .filter(|m| {
            if m.path.as_os_str().is_empty() {
                return true;
            }
            let key = std::fs::canonicalize(&m.path).unwrap_or_else(|_| m.path.clone());
            let fresh = seen_paths.insert(key);
            if !fresh {
                tracing::debug!(material_id = %m.id, "Material listed twice, keeping first");
            }
            fresh
        })
        .collect();
    disambiguate_ids(merged.iter_mut().map(|m| &mut m.id));
    merged
}

/// `unit1/week2/sheet.pdf` → `unit1_week2_sheet.pdf`; `sheet.pdf` → `sheet.pdf`.
pub fn material_id(relative_path: &Path) -> String {
    let parts: Vec<String> = relative_path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.join("_").trim_matches('_').to_string()
}

fn build_material(
    path: &Path,
    id: String,
    title: String,
    group: String,
    extractor: &DocumentExtractor,
) -> MaterialText {
    let text = extractor.extract_text(path);
    if text.is_empty() {
        tracing::warn!(material_id = %id, "No text found in material");
    }
    MaterialText {
        id,
        title,
        text,
        group,
        path: path.to_path_buf(),
    }
}

/// Depth-first, name-sorted walk collecting supported files.
fn walk_supported_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot read material directory");
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk_supported_files(&path, out);
        } else if DocumentFormat::detect(&path).is_some() {
            out.push(path);
        }
    }
}

fn first_dir_component(rel: &Path) -> Option<String> {
    let parent = rel.parent()?;
    parent
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
