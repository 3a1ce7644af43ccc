use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::models::{AcademicYear, ClassLevel, Stream, Subject, TeacherAllocation};
use crate::store::{decode_rows, Filter, Gateway};

/// Allocation dropdowns never page; a teacher carries a handful of
/// classes, ten covers the heaviest timetable we have seen.
const ALLOCATIONS_PAGE: u32 = 10;

/// Loads and tracks the teacher's (subject, stream, year) assignments.
/// The selection drives which roster the marks engine shows.
pub struct AllocationSelector {
    store: Arc<dyn Gateway>,
    allocations: Vec<TeacherAllocation>,
    selected: Option<String>,
}

impl AllocationSelector {
    pub fn new(store: Arc<dyn Gateway>) -> Self {
        AllocationSelector {
            store,
            allocations: Vec::new(),
            selected: None,
        }
    }

    /// Fetch up to one page of allocations and join display names from
    /// the lookup tables. Any store error degrades to an empty list;
    /// the chrome shows "no classes assigned", never an error page.
    pub async fn load(&mut self, teacher_id: &str) {
        let rows = match self
            .store
            .select(
                "teacher_allocations",
                &[Filter::eq("teacher_id", teacher_id)],
                None,
                Some(ALLOCATIONS_PAGE),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(teacher = teacher_id, error = %e, "allocation fetch failed");
                Vec::new()
            }
        };
        let mut allocations: Vec<TeacherAllocation> = decode_rows("teacher_allocations", rows);

        if !allocations.is_empty() {
            let subjects = self.lookup::<Subject>("subjects").await;
            let streams = self.lookup::<Stream>("streams").await;
            let classes = self.lookup::<ClassLevel>("class_levels").await;
            let years = self.lookup::<AcademicYear>("academic_years").await;

            let subject_names: HashMap<&str, &str> = subjects
                .iter()
                .map(|s| (s.id.as_str(), s.name.as_str()))
                .collect();
            let class_names: HashMap<&str, &str> = classes
                .iter()
                .map(|c| (c.id.as_str(), c.name.as_str()))
                .collect();
            let stream_info: HashMap<&str, &Stream> =
                streams.iter().map(|s| (s.id.as_str(), s)).collect();
            let year_names: HashMap<&str, &str> = years
                .iter()
                .map(|y| (y.id.as_str(), y.name.as_str()))
                .collect();

            for alloc in &mut allocations {
                alloc.subject_name = subject_names
                    .get(alloc.subject_id.as_str())
                    .map(|n| n.to_string());
                if let Some(stream) = stream_info.get(alloc.stream_id.as_str()) {
                    alloc.stream_name = Some(stream.name.clone());
                    alloc.class_name = class_names
                        .get(stream.class_id.as_str())
                        .map(|n| n.to_string());
                }
                alloc.year_name = year_names
                    .get(alloc.academic_year_id.as_str())
                    .map(|n| n.to_string());
            }
        }

        self.selected = allocations.first().map(|a| a.id.clone());
        self.allocations = allocations;
    }

    async fn lookup<T: serde::de::DeserializeOwned>(&self, table: &str) -> Vec<T> {
        match self.store.select(table, &[], None, None).await {
            Ok(rows) => decode_rows(table, rows),
            Err(e) => {
                warn!(table, error = %e, "lookup fetch failed");
                Vec::new()
            }
        }
    }

    pub fn list(&self) -> &[TeacherAllocation] {
        &self.allocations
    }

    pub fn selected(&self) -> Option<&TeacherAllocation> {
        let id = self.selected.as_deref()?;
        self.allocations.iter().find(|a| a.id == id)
    }

    /// Change the selection. Returns the newly selected allocation so
    /// the caller can point the marks engine at it.
    pub fn select(&mut self, allocation_id: &str) -> Option<TeacherAllocation> {
        let found = self.allocations.iter().find(|a| a.id == allocation_id)?;
        let found = found.clone();
        self.selected = Some(found.id.clone());
        Some(found)
    }
}
