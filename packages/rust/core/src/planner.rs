//! Tiered query planning.
//!
//! `plan` is a pure function of the record and the tier rank: the same
//! inputs always produce the same query, and nothing is cached or mutated.

use std::sync::LazyLock;

use regex::Regex;

use contactscout_shared::{DomainPolicy, InputRecord, Result, TierDefinition, TierQuery, validate_tiers};

/// Maps a record and a tier rank to that tier's search query.
#[derive(Debug, Clone)]
pub struct QueryTierPlanner {
    tiers: Vec<TierDefinition>,
}

impl QueryTierPlanner {
    /// Tiers must be listed in rank order, starting at 1.
    pub fn new(tiers: Vec<TierDefinition>) -> Result<Self> {
        validate_tiers(&tiers)?;
        Ok(Self { tiers })
    }

    /// Highest tier rank; tiers are numbered `1..=tier_count()`.
    pub fn tier_count(&self) -> u8 {
        self.tiers.len() as u8
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }

    /// Build the query for `rank`, or `None` past the last tier.
    pub fn plan(&self, record: &InputRecord, rank: u8) -> Option<TierQuery> {
        let tier = self.tiers.iter().find(|t| t.rank == rank)?;
        let base = render_template(&tier.template, record);
        let modifier = policy_modifier(&tier.policy);
        Some(TierQuery {
            rank,
            query: format!("{base}{modifier}"),
            policy: tier.policy.clone(),
        })
    }

    /// Every tier's query for `record`, in escalation order.
    pub fn plan_all(&self, record: &InputRecord) -> Vec<TierQuery> {
        (1..=self.tier_count()).filter_map(|rank| self.plan(record, rank)).collect()
    }
}

/// Substitute record fields into a template and normalize spacing.
///
/// Missing optional fields become empty, so a template never leaks a raw
/// placeholder into the query.
pub fn render_template(template: &str, record: &InputRecord) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let field = |v: &Option<String>| v.as_deref().unwrap_or("").trim().to_string();
    let rendered = template
        .replace("{name}", record.name.trim())
        .replace("{title}", &field(&record.title))
        .replace("{city}", &field(&record.city))
        .replace("{state}", &field(&record.state))
        .replace("{location}", &record.location());

    WS_RE.replace_all(rendered.trim(), " ").into_owned()
}

/// `site:` operators expressing a tier's domain policy.
fn policy_modifier(policy: &DomainPolicy) -> String {
    match policy {
        DomainPolicy::Unrestricted => String::new(),
        DomainPolicy::Allow { domains } => {
            let sites: Vec<String> = domains.iter().map(|d| format!("site:{d}")).collect();
            format!(" ({})", sites.join(" OR "))
        }
        DomainPolicy::Deny { domains } => domains.iter().map(|d| format!(" -site:{d}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contactscout_shared::AppConfig;

    fn planner() -> QueryTierPlanner {
        QueryTierPlanner::new(AppConfig::default().tiers).unwrap()
    }

    fn record() -> InputRecord {
        InputRecord::new("r-1", "Jane Doe")
            .with_title("Cardiologist")
            .with_city("Boston")
            .with_state("MA")
    }

    #[test]
    fn default_tiers_escalate_from_directories_to_open_web() {
        let planner = planner();
        assert_eq!(planner.tier_count(), 3);

        let t1 = planner.plan(&record(), 1).unwrap();
        assert_eq!(
            t1.query,
            "Jane Doe Cardiologist Boston MA doctor healthcare provider (site:doximity.com OR site:npiprofile.com)"
        );

        let t2 = planner.plan(&record(), 2).unwrap();
        assert!(t2.query.ends_with("(site:.gov OR site:.edu)"));

        let t3 = planner.plan(&record(), 3).unwrap();
        assert!(!t3.query.contains("site:"));
        assert!(t3.query.ends_with("contact information"));
        assert_eq!(t3.policy, DomainPolicy::Unrestricted);

        assert!(planner.plan(&record(), 4).is_none());
        assert!(planner.plan(&record(), 0).is_none());
        assert_eq!(planner.plan_all(&record()), vec![t1, t2, t3]);
    }

    #[test]
    fn plan_is_pure() {
        let planner = planner();
        let record = record();
        let first = planner.plan(&record, 2);
        for _ in 0..5 {
            assert_eq!(planner.plan(&record, 2), first);
        }
    }

    #[test]
    fn missing_fields_leave_no_gaps() {
        let q = render_template("{name} {title} {city} {state} doctor", &InputRecord::new("r", "Jane Doe"));
        assert_eq!(q, "Jane Doe doctor");

        let q = render_template("\"{name}\" {location}", &record());
        assert_eq!(q, "\"Jane Doe\" Boston, MA");
    }

    #[test]
    fn deny_policy_excludes_sites() {
        let planner = QueryTierPlanner::new(vec![TierDefinition {
            rank: 1,
            template: "{name}".into(),
            policy: DomainPolicy::Deny {
                domains: vec!["yelp.com".into(), "healthgrades.com".into()],
            },
        }])
        .unwrap();
        assert_eq!(
            planner.plan(&record(), 1).unwrap().query,
            "Jane Doe -site:yelp.com -site:healthgrades.com"
        );
    }

    #[test]
    fn rejects_gapped_tiers() {
        let tiers = vec![TierDefinition {
            rank: 2,
            template: "{name}".into(),
            policy: DomainPolicy::Unrestricted,
        }];
        assert!(QueryTierPlanner::new(tiers).is_err());
    }
}
