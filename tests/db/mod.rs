#![allow(unused)]

use async_trait::async_trait;
use cos_dataloader::{BatchFunction, ToMany, ToOne};
use std::sync::Arc;
use uuid::Uuid;

pub struct Database {
    pub emails: Vec<Email>,
    pub organizations: Vec<Organization>,
    pub job_roles: Vec<JobRole>,
}

impl Database {
    pub fn fake() -> Arc<Self> {
        let emails: Vec<_> = (0..300)
            .map(|_| {
                let name = fakeit::name::full();
                Email {
                    id: Uuid::new_v4(),
                    address: format!("{}@example.com", name.replace(' ', ".").to_lowercase()),
                }
            })
            .collect();
        // Every third email has no organizations at all
        let organizations: Vec<_> = emails
            .iter()
            .enumerate()
            .flat_map(|(n, email)| {
                (0..(n % 3)).map(move |_| Organization {
                    id: Uuid::new_v4(),
                    name: fakeit::words::sentence(2),
                    email_id: email.id,
                })
            })
            .collect();
        let job_roles: Vec<_> = (0..300)
            .map(|n| JobRole {
                id: Uuid::new_v4(),
                title: fakeit::words::sentence(2),
                organization_id: if n % 2 == 0 {
                    Some(organizations[n % organizations.len()].id)
                } else {
                    None
                },
            })
            .collect();

        let db = Database {
            emails,
            organizations,
            job_roles,
        };
        Arc::new(db)
    }

    pub fn organizations_for_email(&self, email_id: Uuid) -> Vec<Organization> {
        self.organizations
            .iter()
            .filter(|organization| organization.email_id == email_id)
            .cloned()
            .collect()
    }

    pub fn organization_for_job_role(&self, job_role_id: Uuid) -> Option<Organization> {
        let job_role = self.job_roles.iter().find(|role| role.id == job_role_id)?;
        let organization_id = job_role.organization_id?;
        self.organizations
            .iter()
            .find(|organization| organization.id == organization_id)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub id: Uuid,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub email_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRole {
    pub id: Uuid,
    pub title: String,
    pub organization_id: Option<Uuid>,
}

/// An organization returned for a job role, tagged with the job role it was
/// requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRoleOrganization {
    pub job_role_id: Uuid,
    pub organization: Organization,
}

#[derive(Clone)]
pub struct OrganizationsForEmails {
    pub db: Arc<Database>,
}

#[async_trait]
impl BatchFunction for OrganizationsForEmails {
    type Key = Uuid;
    type Record = Organization;
    type Relation = ToMany;
    type Error = anyhow::Error;

    async fn load(&self, keys: &[Uuid]) -> anyhow::Result<Vec<Organization>> {
        let organizations = self
            .db
            .organizations
            .iter()
            .filter(|organization| keys.contains(&organization.email_id))
            .cloned()
            .collect();

        Ok(organizations)
    }

    fn correlation_key(&self, record: &Organization) -> Uuid {
        record.email_id
    }
}

#[derive(Clone)]
pub struct OrganizationForJobRoles {
    pub db: Arc<Database>,
}

#[async_trait]
impl BatchFunction for OrganizationForJobRoles {
    type Key = Uuid;
    type Record = JobRoleOrganization;
    type Relation = ToOne;
    type Error = anyhow::Error;

    async fn load(&self, keys: &[Uuid]) -> anyhow::Result<Vec<JobRoleOrganization>> {
        let records = keys
            .iter()
            .filter_map(|job_role_id| {
                let organization = self.db.organization_for_job_role(*job_role_id)?;
                Some(JobRoleOrganization {
                    job_role_id: *job_role_id,
                    organization,
                })
            })
            .collect();

        Ok(records)
    }

    fn correlation_key(&self, record: &JobRoleOrganization) -> Uuid {
        record.job_role_id
    }
}
