use serde_json::{Map, Value};

use super::store::MirrorError;

/// Every backend entity type that has a collection in the local mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Projects,
    Subprojects,
    Activities,
    Users,
    Roles,
    Permissions,
    UserRoles,
    RolePermissions,
    ProjectUsers,
    SubprojectUsers,
    ActivityUsers,
    Beneficiaries,
    BeneficiaryAssignments,
    FormTemplates,
    FormResponses,
    FormEntityAssociations,
    Services,
    ServiceAssignments,
    ServiceDeliveries,
    Kpis,
}

impl Collection {
    pub const ALL: [Collection; 20] = [
        Collection::Projects,
        Collection::Subprojects,
        Collection::Activities,
        Collection::Users,
        Collection::Roles,
        Collection::Permissions,
        Collection::UserRoles,
        Collection::RolePermissions,
        Collection::ProjectUsers,
        Collection::SubprojectUsers,
        Collection::ActivityUsers,
        Collection::Beneficiaries,
        Collection::BeneficiaryAssignments,
        Collection::FormTemplates,
        Collection::FormResponses,
        Collection::FormEntityAssociations,
        Collection::Services,
        Collection::ServiceAssignments,
        Collection::ServiceDeliveries,
        Collection::Kpis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::Subprojects => "subprojects",
            Collection::Activities => "activities",
            Collection::Users => "users",
            Collection::Roles => "roles",
            Collection::Permissions => "permissions",
            Collection::UserRoles => "userRoles",
            Collection::RolePermissions => "rolePermissions",
            Collection::ProjectUsers => "projectUsers",
            Collection::SubprojectUsers => "subprojectUsers",
            Collection::ActivityUsers => "activityUsers",
            Collection::Beneficiaries => "beneficiaries",
            Collection::BeneficiaryAssignments => "beneficiaryAssignments",
            Collection::FormTemplates => "formTemplates",
            Collection::FormResponses => "formResponses",
            Collection::FormEntityAssociations => "formEntityAssociations",
            Collection::Services => "services",
            Collection::ServiceAssignments => "serviceAssignments",
            Collection::ServiceDeliveries => "serviceDeliveries",
            Collection::Kpis => "kpis",
        }
    }

    pub fn parse(value: &str) -> Result<Self, MirrorError> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == value)
            .ok_or_else(|| MirrorError::UnknownCollection(value.to_string()))
    }

    /// Field carrying the owning entity's id on user-assignment rows.
    pub fn parent_key(&self) -> Option<&'static str> {
        match self {
            Collection::ProjectUsers => Some("projectId"),
            Collection::SubprojectUsers => Some("subprojectId"),
            Collection::ActivityUsers => Some("activityId"),
            _ => None,
        }
    }

    /// Primary key of a record in this collection.
    ///
    /// Assignment rows are keyed `<parentId>:<userId>` so one user held by
    /// several parents keeps a row per parent. Rows without `userId` fall
    /// back to their own `id` as the member part.
    pub fn key_for(&self, record: &Map<String, Value>) -> Option<String> {
        let Some(parent_key) = self.parent_key() else {
            return record.get("id").and_then(key_string);
        };
        let parent = record.get(parent_key).and_then(key_string)?;
        let member = record
            .get("userId")
            .and_then(key_string)
            .or_else(|| record.get("id").and_then(key_string))?;
        Some(format!("{parent}:{member}"))
    }
}

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
