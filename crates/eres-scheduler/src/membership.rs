//! Report group → member user IDs, read from the membership join table.

use async_trait::async_trait;
use eres_core::error::{EresError, Result};
use eres_core::traits::MembershipResolver;
use eres_core::types::{ReportGroup, ReportGroupMembership};
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;

use crate::persistence::SchedulerDb;

/// Outcome of a raw membership lookup before unknown groups are folded into
/// "no members".
#[derive(Debug, PartialEq)]
pub enum GroupLookup {
    Members(Vec<String>),
    UnknownGroup,
}

impl SchedulerDb {
    /// Look up members of a group, distinguishing an unknown group from an
    /// empty one. Rows are read in membership-id order and duplicate users
    /// are collapsed, keeping the first occurrence.
    pub fn lookup_group(&self, report_group_id: &str) -> Result<GroupLookup> {
        let conn = self.lock()?;
        let known = conn
            .query_row(
                "SELECT 1 FROM ReportGroup WHERE id = ?1",
                [report_group_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| EresError::StoreUnavailable(format!("Group lookup: {e}")))?;
        if known.is_none() {
            return Ok(GroupLookup::UnknownGroup);
        }

        let mut stmt = conn
            .prepare_cached(
                "SELECT m.userID FROM ReportGroupMembership m
                 INNER JOIN ReportGroup g ON g.id = m.reportGroupID
                 WHERE m.reportGroupID = ?1
                 ORDER BY m.id",
            )
            .map_err(|e| EresError::StoreUnavailable(format!("Membership query: {e}")))?;
        let user_ids = stmt
            .query_map([report_group_id], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| EresError::StoreUnavailable(format!("Membership rows: {e}")))?;

        let mut seen = HashSet::new();
        let members = user_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Ok(GroupLookup::Members(members))
    }

    // ─── Group administration (owned upstream; used for seeding) ───

    pub fn save_group(&self, group: &ReportGroup) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO ReportGroup (id, name, description) VALUES (?1, ?2, ?3)",
                params![group.id, group.name, group.description],
            )
            .map_err(|e| EresError::StoreUnavailable(format!("Save group: {e}")))?;
        Ok(())
    }

    pub fn save_membership(&self, membership: &ReportGroupMembership) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO ReportGroupMembership (id, userID, reportGroupID)
                 VALUES (?1, ?2, ?3)",
                params![membership.id, membership.user_id, membership.report_group_id],
            )
            .map_err(|e| EresError::StoreUnavailable(format!("Save membership: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MembershipResolver for SchedulerDb {
    async fn members_of(&self, report_group_id: &str) -> Result<Vec<String>> {
        match self.lookup_group(report_group_id)? {
            GroupLookup::Members(members) => Ok(members),
            GroupLookup::UnknownGroup => {
                tracing::debug!("👥 Report group {} is unknown, treating as empty", report_group_id);
                Ok(Vec::new())
            }
        }
    }
}
