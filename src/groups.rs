use std::collections::HashMap;

use crate::catalog::ProjectCatalog;
use crate::feed::FeedProgress;
use crate::models::{same_key, DropoutSet, Group, GroupMember};

/// Groups keep feed order. Status is copied from the group record, never derived.
pub fn build_groups(
    progress: &[FeedProgress],
    project_name: &str,
    catalog: &ProjectCatalog,
    dropouts: &DropoutSet,
) -> Vec<Group> {
    let target = project_name.trim();
    let track = catalog.track_of(target);
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for record in progress
        .iter()
        .filter(|record| same_key(&record.object.name, target))
    {
        let group = groups.entry(record.group.id.clone()).or_insert_with(|| {
            order.push(record.group.id.clone());
            Group {
                group_id: record.group.id.clone(),
                project_name: record.object.name.trim().to_string(),
                track,
                members: Vec::new(),
                status: record.group.status.clone(),
                updated_at: record.group.updated_at,
            }
        });

        let login = record.user.login.trim();
        if group
            .members
            .iter()
            .any(|member| same_key(&member.login, login))
        {
            continue;
        }
        group.members.push(GroupMember {
            login: login.to_string(),
            first_name: record.user.first_name.clone(),
            last_name: record.user.last_name.clone(),
            is_dropout: dropouts.contains(login),
        });
        if record.group.updated_at > group.updated_at {
            group.updated_at = record.group.updated_at;
        }
    }

    order
        .into_iter()
        .filter_map(|group_id| groups.remove(&group_id))
        .collect()
}

/// Groups that can be shown in audit workflows.
pub fn audit_eligible(groups: &[Group]) -> impl Iterator<Item = &Group> {
    groups.iter().filter(|group| group.is_audit_eligible())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Track;
    use crate::feed::testing::record;
    use crate::models::ProgressStatus;

    fn catalog() -> ProjectCatalog {
        ProjectCatalog::from_names(&[(Track::Golang, &["forum", "lem-in"])]).unwrap()
    }

    #[test]
    fn groups_members_by_group_id() {
        let progress = vec![
            record("jdoe", "forum", "10", "finished"),
            record("asmith", "Forum", "10", "finished"),
            record("bwayne", "forum", "11", "working"),
            record("ckent", "lem-in", "12", "finished"),
        ];
        let groups = build_groups(&progress, "FORUM", &catalog(), &DropoutSet::default());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, "10");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].track, Some(Track::Golang));
        assert_eq!(groups[0].members[1].first_name.as_deref(), Some("asmith-first"));
        assert_eq!(groups[1].group_id, "11");
        assert_eq!(groups[1].status, ProgressStatus::Working);
    }

    #[test]
    fn marks_dropouts_case_insensitively() {
        let progress = vec![
            record("JDoe", "forum", "10", "finished"),
            record("asmith", "forum", "10", "finished"),
        ];
        let dropouts = DropoutSet::new(["jdoe"]);
        let groups = build_groups(&progress, "forum", &catalog(), &dropouts);

        assert!(groups[0].members[0].is_dropout);
        assert!(!groups[0].members[1].is_dropout);
        assert_eq!(groups[0].active_members(), 1);
    }

    #[test]
    fn eligibility_filter_is_left_to_callers() {
        let progress = vec![
            record("jdoe", "forum", "10", "finished"),
            record("asmith", "forum", "11", "finished"),
            record("bwayne", "forum", "12", "audit"),
        ];
        let dropouts = DropoutSet::new(["asmith"]);
        let groups = build_groups(&progress, "forum", &catalog(), &dropouts);
        assert_eq!(groups.len(), 3);

        let eligible: Vec<_> = audit_eligible(&groups).map(|g| g.group_id.as_str()).collect();
        assert_eq!(eligible, vec!["10"]);
    }

    #[test]
    fn duplicate_records_do_not_duplicate_members() {
        let progress = vec![
            record("jdoe", "forum", "10", "finished"),
            record("JDOE", "forum", "10", "finished"),
        ];
        let groups = build_groups(&progress, "forum", &catalog(), &DropoutSet::default());
        assert_eq!(groups[0].members.len(), 1);
    }

    #[test]
    fn unknown_project_has_no_track() {
        let progress = vec![record("jdoe", "piscine", "1", "finished")];
        let groups = build_groups(&progress, "piscine", &catalog(), &DropoutSet::default());
        assert_eq!(groups[0].track, None);
    }
}
