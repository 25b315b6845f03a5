//! The pathfinding collaborator contract.
//!
//! The engine never searches graphs itself. It describes its graph through a
//! neighbour function and hands it to a [`PathFinder`] supplied by the game,
//! which returns an ordered sequence of [`Site`]s (start and end included) or
//! `None` when no path exists.

use crate::fixed::Fixed64;
use crate::hex::Site;

/// Neighbour function: the sites reachable in one step from a site, with the
/// cost of that step.
pub type Neighbors<'a> = dyn Fn(Site) -> Vec<(Site, u32)> + 'a;

/// Graph search over a neighbour function.
pub trait PathFinder: std::fmt::Debug {
    /// Shortest path from `start` to `goal`, abandoning searches costlier
    /// than `max_cost`. When `punctual` is false, a path ending next to
    /// `goal` is acceptable.
    fn find_path(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        goal: Site,
        max_cost: u32,
        punctual: bool,
    ) -> Option<Vec<Site>>;

    /// Path to the cheapest site satisfying `is_goal`, abandoning searches
    /// costlier than `stop_cost`.
    fn find_nearest(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        is_goal: &dyn Fn(Site) -> bool,
        stop_cost: u32,
    ) -> Option<Vec<Site>>;

    /// Path to the site with the highest `score` within `stop_cost`. Sites
    /// scoring `None` are not candidates. The search may stop early once a
    /// site reaches `best_possible`.
    fn find_best(
        &self,
        neighbors: &Neighbors<'_>,
        start: Site,
        score: &dyn Fn(Site) -> Option<Fixed64>,
        stop_cost: u32,
        best_possible: Fixed64,
    ) -> Option<Vec<Site>>;
}

/// Number of steps in a path (sites minus one).
pub fn path_length(path: &[Site]) -> usize {
    path.len().saturating_sub(1)
}
