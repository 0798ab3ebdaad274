//! Plan skeletons suggested per task type.

use crate::db::models::TaskType;
use crate::error::{ArbeitError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Template {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub plan_template: &'static str,
}

pub const TEMPLATES: &[Template] = &[
    Template {
        name: "epic",
        task_type: TaskType::Epic,
        plan_template: "Plan:\n- Goals:\n  - <outcomes to deliver>\n- Milestones:\n  - <major phases/modules>\n- Dependencies:\n  - <blocking work>\n",
    },
    Template {
        name: "feature",
        task_type: TaskType::Feature,
        plan_template: "Plan:\n- Changes:\n  - <steps>\n- Files:\n  - <files or areas>\n- Tests:\n  - <tests to run/add>\n- Risks:\n  - <edge cases>\n",
    },
    Template {
        name: "bug",
        task_type: TaskType::Bug,
        plan_template: "Plan:\n- Repro:\n  - <steps>\n- Fix:\n  - <approach>\n- Tests:\n  - <coverage>\n- Verify:\n  - <validation steps>\n",
    },
    Template {
        name: "investigation",
        task_type: TaskType::Investigation,
        plan_template: "Plan:\n- Questions:\n  - <what to answer>\n- Sources:\n  - <files/docs/experiments>\n- Output:\n  - <decision + recommendation>\n",
    },
    Template {
        name: "chore",
        task_type: TaskType::Chore,
        plan_template: "Plan:\n- Changes:\n  - <steps>\n- Files:\n  - <files or areas>\n- Tests:\n  - <tests to run>\n- Safety:\n  - <backups/rollback>\n",
    },
];

pub const TEMPLATE_NAMES: &[&str] = &["epic", "feature", "bug", "investigation", "chore"];

pub fn list_templates() -> &'static [Template] {
    TEMPLATES
}

/// Look up a template by name, failing with `INVALID_TEMPLATE`.
pub fn template(name: &str) -> Result<&'static Template> {
    TEMPLATES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| ArbeitError::InvalidTemplate(name.to_string()))
}

pub fn template_for(task_type: TaskType) -> &'static Template {
    TEMPLATES
        .iter()
        .find(|t| t.task_type == task_type)
        .unwrap_or(&TEMPLATES[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_task_type_has_a_template() {
        for task_type in TaskType::ALL {
            assert_eq!(template_for(*task_type).task_type, *task_type);
        }
        assert_eq!(TEMPLATE_NAMES.len(), TEMPLATES.len());
    }

    #[test]
    fn test_template_lookup() {
        let bug = template("bug").unwrap();
        assert_eq!(bug.task_type, TaskType::Bug);
        assert!(bug.plan_template.contains("Repro"));

        let err = template("story").unwrap_err();
        assert_eq!(err.to_error_code(), "INVALID_TEMPLATE");
        assert!(err.suggestions()[0].contains("investigation"));
    }
}
