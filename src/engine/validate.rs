use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.start > range.end {
        return Err(EngineError::InvalidInput(format!(
            "start {} is after end {}",
            range.start, range.end
        )));
    }
    if range.start < min_valid_date() || range.end > max_valid_date() {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.days() > MAX_ASSIGNMENT_DAYS {
        return Err(EngineError::LimitExceeded("assignment too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &DateRange) -> Result<(), EngineError> {
    if window.start > window.end {
        return Err(EngineError::InvalidInput(format!(
            "window start {} is after end {}",
            window.start, window.end
        )));
    }
    if window.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_project(project: &Project) -> Result<(), EngineError> {
    validate_name(&project.name, "project name")?;
    if project.a_konto_percent > 100 {
        return Err(EngineError::InvalidInput(format!(
            "a_konto_percent {} is above 100",
            project.a_konto_percent
        )));
    }
    if let Some(ref t) = project.project_type
        && t.len() > MAX_PROJECT_TYPE_LEN
    {
        return Err(EngineError::LimitExceeded("project type too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::day;
    use ulid::Ulid;

    fn project() -> Project {
        Project {
            id: Ulid::new(),
            name: "Skole".into(),
            amount: 1_000_000,
            a_konto_percent: 30,
            billing_type: BillingType::AKonto,
            status: ProjectStatus::Active,
            project_type: None,
            project_leader_id: None,
        }
    }

    #[test]
    fn range_checks() {
        let ok = DateRange::new(day("2024-01-01"), day("2024-12-31"));
        assert!(validate_range(&ok).is_ok());

        let inverted = DateRange { start: day("2024-02-01"), end: day("2024-01-01") };
        assert!(matches!(validate_range(&inverted), Err(EngineError::InvalidInput(_))));

        let ancient = DateRange::new(day("1900-01-01"), day("1900-01-02"));
        assert!(matches!(validate_range(&ancient), Err(EngineError::LimitExceeded(_))));

        let huge = DateRange::new(day("2000-01-01"), day("2020-01-01"));
        assert!(matches!(validate_range(&huge), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn window_checks() {
        let year = DateRange::new(day("2024-01-01"), day("2024-12-31"));
        assert!(validate_window(&year).is_ok()); // 366 days in a leap year
        let too_wide = DateRange::new(day("2024-01-01"), day("2025-01-01"));
        assert!(matches!(validate_window(&too_wide), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn name_checks() {
        assert!(validate_name("Ola", "worker name").is_ok());
        assert!(validate_name("   ", "worker name").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1), "worker name").is_err());
    }

    #[test]
    fn project_checks() {
        assert!(validate_project(&project()).is_ok());

        let mut p = project();
        p.a_konto_percent = 101;
        assert!(matches!(validate_project(&p), Err(EngineError::InvalidInput(_))));

        let mut p = project();
        p.project_type = Some("y".repeat(MAX_PROJECT_TYPE_LEN + 1));
        assert!(matches!(validate_project(&p), Err(EngineError::LimitExceeded(_))));
    }
}
