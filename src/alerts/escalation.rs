use crate::advice::{EscalationStep, Severity};
use crate::config::EscalationConfig;
use crate::events::ServiceInfo;

/// Derives an advisory's escalation path from its affected services
///
/// Level 1 goes to the services' own alert contacts (or the default
/// contact when none are registered), level 2 to the team contact and
/// level 3 to management. Thresholds depend on severity and are halved
/// when any affected service is registered as critical.
#[derive(Debug, Clone, Default)]
pub struct EscalationPlanner {
    config: EscalationConfig,
}

impl EscalationPlanner {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    /// Minutes after detection at which each level is engaged
    pub fn thresholds(severity: Severity) -> [u64; 3] {
        match severity {
            Severity::Critical => [0, 15, 60],
            Severity::High => [0, 60, 240],
            Severity::Medium => [0, 240, 1440],
            Severity::Low => [0, 1440, 4320],
        }
    }

    /// Build the path for `severity` given the registrations that are known
    ///
    /// Unregistered services contribute nothing; with no registrations at
    /// all the default contact and unhalved thresholds apply.
    pub fn plan(&self, severity: Severity, services: &[ServiceInfo]) -> Vec<EscalationStep> {
        let critical = services.iter().any(ServiceInfo::is_critical);
        let divisor = if critical { 2 } else { 1 };

        let mut contacts: Vec<&str> = services
            .iter()
            .flat_map(|s| s.alert_contacts.iter())
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        contacts.sort_unstable();
        contacts.dedup();

        let first_contact = if contacts.is_empty() {
            self.config.default_contact.clone()
        } else {
            contacts.join(", ")
        };

        let recipients = [
            first_contact,
            self.config.team_contact.clone(),
            self.config.management_contact.clone(),
        ];

        Self::thresholds(severity)
            .iter()
            .zip(recipients)
            .enumerate()
            .map(|(i, (&minutes, contact))| EscalationStep {
                level: i as u8 + 1,
                contact,
                threshold_minutes: minutes / divisor,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServiceRegistration;
    use chrono::Utc;

    fn service(name: &str, criticality: &str, contacts: &[&str]) -> ServiceInfo {
        ServiceRegistration {
            service_name: Some(name.to_string()),
            criticality_level: Some(criticality.to_string()),
            alert_contacts: contacts.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
        .into_service_info(Utc::now())
        .unwrap()
    }

    #[test]
    fn test_unregistered_services_use_default_contact() {
        let planner = EscalationPlanner::default();
        let path = planner.plan(Severity::High, &[]);

        assert_eq!(path.len(), 3);
        assert_eq!(path[0].contact, "operations");
        assert_eq!(path[1].contact, "on-call-engineering");
        assert_eq!(path[2].contact, "engineering-management");
        let minutes: Vec<u64> = path.iter().map(|s| s.threshold_minutes).collect();
        assert_eq!(minutes, vec![0, 60, 240]);
    }

    #[test]
    fn test_service_contacts_lead_the_path() {
        let planner = EscalationPlanner::default();
        let services = vec![
            service("a", "medium", &["b@example.com", "a@example.com"]),
            service("b", "low", &["a@example.com"]),
        ];

        let path = planner.plan(Severity::Medium, &services);
        assert_eq!(path[0].contact, "a@example.com, b@example.com");
        assert_eq!(path[0].level, 1);
        assert_eq!(path[2].level, 3);
    }

    #[test]
    fn test_critical_service_halves_thresholds() {
        let planner = EscalationPlanner::default();
        let services = vec![service("core", "CRITICAL", &[])];

        let path = planner.plan(Severity::Critical, &services);
        let minutes: Vec<u64> = path.iter().map(|s| s.threshold_minutes).collect();
        assert_eq!(minutes, vec![0, 7, 30]);
    }
}
