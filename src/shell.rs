use serde::{Deserialize, Serialize};

/// The portal's views, one sidebar entry each. The router value is the
/// only shell state; everything else lives with the view that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    Dashboard,
    Academics,
    Students,
    Reports,
    Discipline,
    Houses,
}

impl ActiveView {
    pub fn label(&self) -> &'static str {
        match self {
            ActiveView::Dashboard => "Dashboard",
            ActiveView::Academics => "Academics & Marks",
            ActiveView::Students => "Students",
            ActiveView::Reports => "Reports",
            ActiveView::Discipline => "Discipline Log",
            ActiveView::Houses => "House System",
        }
    }

    /// Views with a real page behind them; the rest render the
    /// under-construction placeholder.
    pub fn is_built(&self) -> bool {
        matches!(self, ActiveView::Dashboard | ActiveView::Academics)
    }

    pub fn all() -> [ActiveView; 6] {
        [
            ActiveView::Dashboard,
            ActiveView::Academics,
            ActiveView::Students,
            ActiveView::Reports,
            ActiveView::Discipline,
            ActiveView::Houses,
        ]
    }
}

/// Finite view router owned by the daemon, replacing the chrome's old
/// free-form global selection string.
pub struct ViewRouter {
    current: ActiveView,
}

impl Default for ViewRouter {
    fn default() -> Self {
        ViewRouter {
            current: ActiveView::Dashboard,
        }
    }
}

impl ViewRouter {
    pub fn current(&self) -> ActiveView {
        self.current
    }

    pub fn set(&mut self, view: ActiveView) {
        self.current = view;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_ids_round_trip_through_json() {
        for view in ActiveView::all() {
            let id = serde_json::to_value(view).unwrap();
            let back: ActiveView = serde_json::from_value(id).unwrap();
            assert_eq!(back, view);
        }
        assert_eq!(
            serde_json::to_value(ActiveView::Academics).unwrap(),
            serde_json::json!("academics")
        );
    }

    #[test]
    fn router_starts_on_dashboard() {
        let mut router = ViewRouter::default();
        assert_eq!(router.current(), ActiveView::Dashboard);
        router.set(ActiveView::Academics);
        assert_eq!(router.current(), ActiveView::Academics);
    }
}
