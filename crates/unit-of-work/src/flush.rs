//! Flush coordination for the repositories enlisted in one unit of work.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RepositoryError, Result};

/// Something a unit of work flushes when it completes.
#[async_trait]
pub trait Flush: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Group this participant flushes with, if any.
    fn group(&self) -> Option<&FlushGroup> {
        None
    }

    /// Returns true if a flush would write anything.
    async fn requires_flush(&self) -> Result<bool>;

    async fn flush(&self) -> Result<()>;
}

/// Brackets the flush of a group so a backend can make it atomic.
#[async_trait]
pub trait TransactionBoundary: Send + Sync {
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

/// Boundary that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransaction;

#[async_trait]
impl TransactionBoundary for NoTransaction {
    async fn begin(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

/// Tag that merges repositories into one flush unit.
///
/// A rollback only undoes storage. Members flushed before the failure have
/// already re-baselined and drained their pending events, so handles taken
/// from a rolled-back group are stale and should be reloaded in a new unit
/// of work.
#[derive(Clone)]
pub struct FlushGroup {
    pub tag: String,
    pub boundary: Arc<dyn TransactionBoundary>,
}

impl FlushGroup {
    pub fn new(tag: impl Into<String>, boundary: Arc<dyn TransactionBoundary>) -> Self {
        Self {
            tag: tag.into(),
            boundary,
        }
    }

    /// A group without a transaction boundary.
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::new(tag, Arc::new(NoTransaction))
    }
}

impl std::fmt::Debug for FlushGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushGroup")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

enum Entry {
    Single(Arc<dyn Flush>),
    Group {
        group: FlushGroup,
        members: Vec<Arc<dyn Flush>>,
    },
}

impl Entry {
    fn members(&self) -> &[Arc<dyn Flush>] {
        match self {
            Self::Single(member) => std::slice::from_ref(member),
            Self::Group { members, .. } => members,
        }
    }
}

fn same_participant(a: &Arc<dyn Flush>, b: &Arc<dyn Flush>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Ordered list of flush participants.
///
/// Participants flush in registration order. Participants sharing a group
/// tag merge into one entry at the position of the first of them; the group
/// flushes its members together inside its [`TransactionBoundary`] when all
/// of them require a flush and each member on its own otherwise.
///
/// A failure stops the sequence and is returned as is. Participants flushed
/// before it stay flushed.
#[derive(Default)]
pub struct FlushController {
    entries: Vec<Entry>,
}

impl FlushController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `participant`; returns false if it was already registered.
    pub fn enlist(&mut self, participant: Arc<dyn Flush>) -> bool {
        if self.contains(&participant) {
            return false;
        }

        let Some(group) = participant.group().cloned() else {
            self.entries.push(Entry::Single(participant));
            return true;
        };

        let existing = self.entries.iter_mut().find_map(|entry| match entry {
            Entry::Group { group: g, members } if g.tag == group.tag => Some(members),
            _ => None,
        });
        match existing {
            Some(members) => members.push(participant),
            None => self.entries.push(Entry::Group {
                group,
                members: vec![participant],
            }),
        }
        true
    }

    pub fn contains(&self, participant: &Arc<dyn Flush>) -> bool {
        self.entries
            .iter()
            .flat_map(Entry::members)
            .any(|member| same_participant(member, participant))
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.members().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of flush units after group merging.
    pub fn unit_count(&self) -> usize {
        self.entries.len()
    }

    pub async fn requires_flush(&self) -> Result<bool> {
        for member in self.entries.iter().flat_map(Entry::members) {
            if member.requires_flush().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes every participant in order.
    pub async fn flush(&self) -> Result<()> {
        for entry in &self.entries {
            match entry {
                Entry::Single(member) => member.flush().await?,
                Entry::Group { group, members } => flush_group(group, members).await?,
            }
        }
        Ok(())
    }
}

async fn flush_group(group: &FlushGroup, members: &[Arc<dyn Flush>]) -> Result<()> {
    let mut together = true;
    for member in members {
        if !member.requires_flush().await? {
            together = false;
            break;
        }
    }

    if !together {
        tracing::debug!(group = %group.tag, "flushing group members independently");
        for member in members {
            member.flush().await?;
        }
        return Ok(());
    }

    group.boundary.begin().await?;
    for member in members {
        if let Err(error) = member.flush().await {
            if let Err(rollback) = group.boundary.rollback().await {
                tracing::warn!(
                    group = %group.tag,
                    error = %rollback,
                    "rollback of flush group failed"
                );
            }
            return Err(error);
        }
    }
    group
        .boundary
        .commit()
        .await
        .map_err(|e| RepositoryError::Boundary {
            group: group.tag.clone(),
            reason: e.to_string(),
        })
}

impl std::fmt::Debug for FlushController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for entry in &self.entries {
            match entry {
                Entry::Single(member) => list.entry(&member.name()),
                Entry::Group { group, members } => list.entry(&format!(
                    "{}[{}]",
                    group.tag,
                    members
                        .iter()
                        .map(|m| m.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            };
        }
        list.finish()
    }
}
