use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A base field every entity of a family carries, keyed by its spreadsheet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseField {
    pub label: &'static str,
    pub required: bool,
}

const PROJECT_FIELDS: &[BaseField] = &[
    BaseField { label: "Group No", required: false },
    BaseField { label: "Title", required: true },
    BaseField { label: "Students", required: false },
    BaseField { label: "Guide", required: false },
    BaseField { label: "Domain", required: false },
];

const INTERNSHIP_FIELDS: &[BaseField] = &[
    BaseField { label: "Student", required: true },
    BaseField { label: "Company", required: false },
    BaseField { label: "Mentor", required: false },
    BaseField { label: "Start Date", required: false },
    BaseField { label: "End Date", required: false },
];

/// The two parallel domains dynamic columns attach to.
///
/// Everything in the attribute subsystem is parameterised by this type, so
/// projects and internships share one implementation and differ only in the
/// tables they address and the base fields they validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityFamily {
    Project,
    Internship,
}

impl EntityFamily {
    pub const ALL: [EntityFamily; 2] = [EntityFamily::Project, EntityFamily::Internship];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityFamily::Project => "project",
            EntityFamily::Internship => "internship",
        }
    }

    /// Plural form used in URLs and as the entity table name.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityFamily::Project => "projects",
            EntityFamily::Internship => "internships",
        }
    }

    pub fn columns_table(&self) -> &'static str {
        match self {
            EntityFamily::Project => "project_columns",
            EntityFamily::Internship => "internship_columns",
        }
    }

    pub fn values_table(&self) -> &'static str {
        match self {
            EntityFamily::Project => "project_column_values",
            EntityFamily::Internship => "internship_column_values",
        }
    }

    pub fn entities_table(&self) -> &'static str {
        self.plural()
    }

    pub fn base_fields(&self) -> &'static [BaseField] {
        match self {
            EntityFamily::Project => PROJECT_FIELDS,
            EntityFamily::Internship => INTERNSHIP_FIELDS,
        }
    }

    pub fn base_field(&self, label: &str) -> Option<&'static BaseField> {
        self.base_fields().iter().find(|f| f.label == label)
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityFamily {
    type Err = String;

    /// Accepts singular or plural, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "project" | "projects" => Ok(EntityFamily::Project),
            "internship" | "internships" => Ok(EntityFamily::Internship),
            other => Err(format!("Unknown entity family: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_segments() {
        assert_eq!("projects".parse::<EntityFamily>(), Ok(EntityFamily::Project));
        assert_eq!("Internship".parse::<EntityFamily>(), Ok(EntityFamily::Internship));
        assert!("students".parse::<EntityFamily>().is_err());
    }

    #[test]
    fn families_use_disjoint_tables() {
        let p = EntityFamily::Project;
        let i = EntityFamily::Internship;
        assert_ne!(p.columns_table(), i.columns_table());
        assert_ne!(p.values_table(), i.values_table());
        assert_ne!(p.entities_table(), i.entities_table());
    }

    #[test]
    fn title_is_required_for_projects() {
        let title = EntityFamily::Project.base_field("Title").unwrap();
        assert!(title.required);
        assert!(EntityFamily::Project.base_field("Student").is_none());
    }
}
