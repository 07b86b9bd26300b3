use casebook_core::Envelope;

use crate::mirror::Collection;

/// How a task moves one entity type from the backend into the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One GET against a collection endpoint.
    Direct {
        endpoint: &'static str,
        envelope: Envelope,
        collection: Collection,
    },
    /// One GET per parent already in the mirror, against
    /// `/{parent_segment}/{id}/users`.
    FanOut {
        parent: Collection,
        parent_segment: &'static str,
        collection: Collection,
    },
    /// The backend has no bulk-list endpoint for this entity yet.
    Skipped {
        collection: Collection,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTask {
    pub name: &'static str,
    pub kind: TaskKind,
}

const fn direct(name: &'static str, endpoint: &'static str, collection: Collection) -> SyncTask {
    SyncTask {
        name,
        kind: TaskKind::Direct {
            endpoint,
            envelope: Envelope::Data,
            collection,
        },
    }
}

const fn direct_items(
    name: &'static str,
    endpoint: &'static str,
    collection: Collection,
) -> SyncTask {
    SyncTask {
        name,
        kind: TaskKind::Direct {
            endpoint,
            envelope: Envelope::DataOrItems,
            collection,
        },
    }
}

const fn fan_out(
    name: &'static str,
    parent: Collection,
    parent_segment: &'static str,
    collection: Collection,
) -> SyncTask {
    SyncTask {
        name,
        kind: TaskKind::FanOut {
            parent,
            parent_segment,
            collection,
        },
    }
}

const fn skipped(name: &'static str, collection: Collection, reason: &'static str) -> SyncTask {
    SyncTask {
        name,
        kind: TaskKind::Skipped { collection, reason },
    }
}

/// Full-sync task order. Fan-out tasks read parents written by earlier tasks,
/// so core entities must come first.
pub static SYNC_TASKS: [SyncTask; 20] = [
    direct("Projects", "/projects", Collection::Projects),
    direct("Subprojects", "/subprojects", Collection::Subprojects),
    direct("Activities", "/activities", Collection::Activities),
    direct("Users", "/users", Collection::Users),
    direct("Roles", "/roles", Collection::Roles),
    direct("Permissions", "/permissions", Collection::Permissions),
    skipped(
        "User Roles",
        Collection::UserRoles,
        "no bulk user-role endpoint",
    ),
    skipped(
        "Role Permissions",
        Collection::RolePermissions,
        "no bulk role-permission endpoint",
    ),
    fan_out(
        "Project Users",
        Collection::Projects,
        "projects",
        Collection::ProjectUsers,
    ),
    fan_out(
        "Subproject Users",
        Collection::Subprojects,
        "subprojects",
        Collection::SubprojectUsers,
    ),
    fan_out(
        "Activity Users",
        Collection::Activities,
        "activities",
        Collection::ActivityUsers,
    ),
    direct_items("Beneficiaries", "/beneficiaries", Collection::Beneficiaries),
    skipped(
        "Beneficiary Assignments",
        Collection::BeneficiaryAssignments,
        "no bulk beneficiary-assignment endpoint",
    ),
    direct_items("Form Templates", "/forms/templates", Collection::FormTemplates),
    direct_items("Form Responses", "/forms/responses", Collection::FormResponses),
    skipped(
        "Form Entity Associations",
        Collection::FormEntityAssociations,
        "no bulk form-association endpoint",
    ),
    direct("Services", "/services", Collection::Services),
    skipped(
        "Service Assignments",
        Collection::ServiceAssignments,
        "no bulk service-assignment endpoint",
    ),
    skipped(
        "Service Deliveries",
        Collection::ServiceDeliveries,
        "no bulk service-delivery endpoint",
    ),
    direct("KPIs", "/kpis", Collection::Kpis),
];

pub fn find_task(name: &str) -> Option<&'static SyncTask> {
    SYNC_TASKS
        .iter()
        .find(|task| task.name.eq_ignore_ascii_case(name))
}

impl SyncTask {
    pub fn collection(&self) -> Collection {
        match self.kind {
            TaskKind::Direct { collection, .. }
            | TaskKind::FanOut { collection, .. }
            | TaskKind::Skipped { collection, .. } => collection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn position(name: &str) -> usize {
        SYNC_TASKS.iter().position(|t| t.name == name).unwrap()
    }

    #[test]
    fn fan_out_parents_are_synced_first() {
        for (idx, task) in SYNC_TASKS.iter().enumerate() {
            if let TaskKind::FanOut { parent, .. } = task.kind {
                let parent_idx = SYNC_TASKS
                    .iter()
                    .position(|t| t.collection() == parent)
                    .unwrap();
                assert!(parent_idx < idx, "{} runs before its parents", task.name);
            }
        }
    }

    #[test]
    fn groups_follow_dependency_order() {
        assert!(position("Activities") < position("Users"));
        assert!(position("Permissions") < position("Project Users"));
        assert!(position("Activity Users") < position("Beneficiaries"));
        assert!(position("Beneficiaries") < position("Form Templates"));
        assert!(position("Form Responses") < position("Services"));
        assert_eq!(position("KPIs"), SYNC_TASKS.len() - 1);
    }

    #[test]
    fn each_collection_has_one_task() {
        let collections: HashSet<_> = SYNC_TASKS.iter().map(SyncTask::collection).collect();
        assert_eq!(collections.len(), SYNC_TASKS.len());
        assert_eq!(collections.len(), Collection::ALL.len());
    }

    #[test]
    fn items_envelope_only_on_beneficiaries_and_forms() {
        let items: Vec<_> = SYNC_TASKS
            .iter()
            .filter(|t| {
                matches!(
                    t.kind,
                    TaskKind::Direct {
                        envelope: Envelope::DataOrItems,
                        ..
                    }
                )
            })
            .map(|t| t.name)
            .collect();
        assert_eq!(items, ["Beneficiaries", "Form Templates", "Form Responses"]);
    }

    #[test]
    fn find_task_ignores_case() {
        assert_eq!(find_task("project users").unwrap().name, "Project Users");
        assert!(find_task("Widgets").is_none());
    }
}
