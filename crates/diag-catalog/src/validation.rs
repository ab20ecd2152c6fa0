//! Structural catalog validation.
//!
//! Runs at load time so that a defective catalog is rejected before any
//! command executes. Overlapping version ranges within one entry are a
//! hard error here, not a tie broken at resolution time.

use std::collections::HashSet;

use anyhow::{bail, Result};

use diag_version::{validate_ranges, VersionRange};

use crate::config::{Catalog, CatalogEntry, VersionedTemplate};

pub(crate) fn validate_catalog(catalog: &Catalog) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in &catalog.entries {
        if entry.id.trim().is_empty() {
            bail!("Catalog entry with empty id");
        }
        if !seen.insert(entry.id.as_str()) {
            bail!("Duplicate catalog entry id: {}", entry.id);
        }
        if entry.versions.is_empty() && entry.os.is_empty() {
            bail!("Catalog entry '{}' has no templates", entry.id);
        }
        validate_template_set(entry, "default", &entry.versions)?;
        for (os, templates) in &entry.os {
            validate_template_set(entry, &os.to_string(), templates)?;
        }
    }
    Ok(())
}

fn validate_template_set(
    entry: &CatalogEntry,
    set_name: &str,
    templates: &[VersionedTemplate],
) -> Result<()> {
    let mut ranges = Vec::with_capacity(templates.len());
    for vt in templates {
        if vt.template.trim().is_empty() {
            bail!(
                "Catalog entry '{}' ({set_name}) has an empty template",
                entry.id
            );
        }
        let range = VersionRange::parse(&vt.range, vt.template.as_str()).map_err(|err| {
            anyhow::anyhow!(
                "Catalog entry '{}' ({set_name}) has an invalid range {:?}: {err}",
                entry.id,
                vt.range
            )
        })?;
        ranges.push(range);
    }
    if let Err((version, first, second)) = validate_ranges(&ranges) {
        bail!(
            "Catalog entry '{}' ({set_name}) has overlapping ranges {:?} and {:?} (both match {version})",
            entry.id,
            first,
            second
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::Catalog;

    #[test]
    fn test_duplicate_id_rejected() {
        let yaml = r#"
entries:
  - id: health
    category: rest
    versions: [{ range: ">=5.0.0", template: "/a" }]
  - id: health
    category: rest
    versions: [{ range: ">=5.0.0", template: "/b" }]
"#;
        let err = Catalog::load_from_string(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("Duplicate catalog entry id"));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let yaml = r#"
entries:
  - id: health
    category: rest
    versions:
      - { range: ">=5.0.0", template: "/old" }
      - { range: ">=6.0.0", template: "/new" }
"#;
        let err = Catalog::load_from_string(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("overlapping ranges"));
    }

    #[test]
    fn test_overlap_in_os_variant_rejected() {
        let yaml = r#"
entries:
  - id: proc_info
    category: syscall
    os:
      linux:
        - { range: ">=0.0.0", template: "cat /proc/meminfo" }
        - { range: ">=1.0.0", template: "cat /proc/vmstat" }
"#;
        assert!(Catalog::load_from_string(yaml).is_err());
    }

    #[test]
    fn test_bad_range_expression_rejected() {
        let yaml = r#"
entries:
  - id: health
    category: rest
    versions: [{ range: "~5.x", template: "/a" }]
"#;
        let err = Catalog::load_from_string(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("invalid range"));
    }

    #[test]
    fn test_entry_without_templates_rejected() {
        let yaml = r#"
entries:
  - id: empty
    category: rest
"#;
        let err = Catalog::load_from_string(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("no templates"));
    }
}
