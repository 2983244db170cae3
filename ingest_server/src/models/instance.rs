//! cicd.instance: A CI/CD server identity.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cicd_instances;

pub const INSTANCE_TYPE_JENKINS: &str = "jenkins";

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = cicd_instances)]
pub struct CicdInstance {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub instance_type: String,
    /// Set when the instance is linked to an integration; never written here.
    pub integration_id: Option<String>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = cicd_instances)]
pub struct NewCicdInstance {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub instance_type: String,
}
