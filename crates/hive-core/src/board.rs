//! Tile occupancy for mobile agents.
//!
//! At most one agent occupies a tile. An agent asking for an occupied tile
//! is parked in that tile's FIFO queue and handed a [`QueueStep`] it can
//! [`poll`](Board::poll). When the occupant leaves, the head of the queue is
//! granted the tile; if the granted agent was itself leaving a tile, that
//! tile is vacated in turn and its queue advances, and so on down the chain.
//!
//! A request that names `from` gives that tile up at once, whether or not
//! the destination is free. A request without `from` from an agent already
//! on the board keeps its tile until the new one is granted. Such holding
//! requests make circular waits possible (A holds its tile and waits for
//! B's while B asks for A's). Before queueing, the board follows the chain
//! "who holds the tile I want, and which tile is *they* waiting for"; if the
//! chain loops, every queued agent in the loop is released and the new
//! request is refused, so the behaviour layer can re-plan.

use crate::hex::Axial;
use crate::id::{AgentId, QueueStep};
use slotmap::SlotMap;
use std::collections::{BTreeMap, VecDeque};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("agent {agent:?} does not occupy {tile}")]
    NotOccupant { agent: AgentId, tile: Axial },
    #[error("agent {0:?} is not on the board")]
    UnknownAgent(AgentId),
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Anything that can stand on a tile.
pub trait Occupant {
    fn agent_id(&self) -> AgentId;
}

impl Occupant for AgentId {
    fn agent_id(&self) -> AgentId {
        *self
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// State of a queue step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Still queued; `position` agents are ahead.
    Waiting { position: usize },
    /// The agent now occupies the tile.
    Granted,
    /// Dropped to break a circular wait.
    Released,
    /// Withdrawn by the agent.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Granted,
    Released,
    Cancelled,
}

#[derive(Debug, Clone)]
struct StepState {
    agent: AgentId,
    to: Axial,
    /// Tile the agent keeps until granted `to`.
    holding: Option<Axial>,
    phase: Phase,
}

/// Result of [`Board::move_character`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The agent occupies the tile now.
    Moved,
    /// The tile is taken; the agent waits in its queue.
    Queued(QueueStep),
    /// Queueing would close a circular wait. The listed agents had their
    /// steps released; the mover was not queued.
    Deadlock { released: Vec<AgentId> },
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Board {
    occupants: BTreeMap<Axial, AgentId>,
    positions: BTreeMap<AgentId, Axial>,
    queues: BTreeMap<Axial, VecDeque<QueueStep>>,
    steps: SlotMap<QueueStep, StepState>,
    waiting: BTreeMap<AgentId, QueueStep>,
    granted: Vec<(AgentId, Axial)>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupant(&self, tile: Axial) -> Option<AgentId> {
        self.occupants.get(&tile).copied()
    }

    pub fn position(&self, agent: AgentId) -> Option<Axial> {
        self.positions.get(&agent).copied()
    }

    /// Agents queued for `tile`, head first.
    pub fn queue(&self, tile: Axial) -> Vec<AgentId> {
        self.queues
            .get(&tile)
            .map(|q| q.iter().filter_map(|&s| self.steps.get(s)).map(|s| s.agent).collect())
            .unwrap_or_default()
    }

    /// The tile `agent` is queued for, if any.
    pub fn waiting_for(&self, agent: AgentId) -> Option<Axial> {
        let step = self.waiting.get(&agent)?;
        self.steps.get(*step).map(|s| s.to)
    }

    /// Move `who` onto `to`.
    ///
    /// `from`, if given, must be the agent's tile; it is vacated right away
    /// and its queue advances. Without `from`, an agent already on the board
    /// keeps its tile until it enters `to`. Any earlier queued request by the
    /// same agent is cancelled.
    pub fn move_character(
        &mut self,
        who: &impl Occupant,
        to: Axial,
        from: Option<Axial>,
    ) -> Result<MoveOutcome, BoardError> {
        let agent = who.agent_id();
        if let Some(tile) = from {
            if self.occupant(tile) != Some(agent) {
                return Err(BoardError::NotOccupant { agent, tile });
            }
        }

        if let Some(step) = self.waiting.get(&agent).copied() {
            self.finish(step, Phase::Cancelled);
        }
        self.purge_finished(agent);

        if self.occupant(to) == Some(agent) {
            return Ok(MoveOutcome::Moved);
        }
        if let Some(from) = from {
            self.vacate(from);
        }
        let holding = self.position(agent);

        if !self.occupants.contains_key(&to) {
            self.occupy(agent, to);
            if let Some(old) = holding {
                self.vacate(old);
            }
            tracing::debug!(agent = ?agent, tile = %to, "agent moved");
            return Ok(MoveOutcome::Moved);
        }

        if let Some(cycle) = self.circular_wait(agent, to) {
            let mut released = Vec::new();
            for member in cycle {
                if let Some(step) = self.waiting.get(&member).copied() {
                    self.finish(step, Phase::Released);
                    released.push(member);
                }
            }
            tracing::debug!(
                agent = ?agent,
                tile = %to,
                released = ?released,
                "circular wait broken"
            );
            return Ok(MoveOutcome::Deadlock { released });
        }

        let step = self.steps.insert(StepState {
            agent,
            to,
            holding,
            phase: Phase::Waiting,
        });
        self.queues.entry(to).or_default().push_back(step);
        self.waiting.insert(agent, step);
        tracing::debug!(agent = ?agent, tile = %to, "agent queued");
        Ok(MoveOutcome::Queued(step))
    }

    /// Current state of a step. `None` once the step's agent has queued
    /// again or left the board.
    pub fn poll(&self, step: QueueStep) -> Option<StepStatus> {
        let state = self.steps.get(step)?;
        Some(match state.phase {
            Phase::Waiting => {
                let position = self
                    .queues
                    .get(&state.to)
                    .and_then(|q| q.iter().position(|&s| s == step))
                    .unwrap_or(0);
                StepStatus::Waiting { position }
            }
            Phase::Granted => StepStatus::Granted,
            Phase::Released => StepStatus::Released,
            Phase::Cancelled => StepStatus::Cancelled,
        })
    }

    /// Withdraw a queued request. Safe on finished or unknown steps.
    pub fn cancel(&mut self, step: QueueStep) {
        if self.steps.get(step).is_some_and(|s| s.phase == Phase::Waiting) {
            self.finish(step, Phase::Cancelled);
        }
    }

    /// Take an agent off the board: cancel its request and vacate its tile.
    pub fn remove_agent(&mut self, agent: AgentId) -> Result<(), BoardError> {
        let step = self.waiting.get(&agent).copied();
        let tile = self.position(agent);
        if step.is_none() && tile.is_none() {
            return Err(BoardError::UnknownAgent(agent));
        }
        if let Some(step) = step {
            self.finish(step, Phase::Cancelled);
        }
        if let Some(tile) = tile {
            self.vacate(tile);
        }
        self.purge_finished(agent);
        Ok(())
    }

    /// Agents granted a tile since the last call, in grant order.
    pub fn drain_granted(&mut self) -> Vec<(AgentId, Axial)> {
        std::mem::take(&mut self.granted)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn occupy(&mut self, agent: AgentId, tile: Axial) {
        self.occupants.insert(tile, agent);
        self.positions.insert(agent, tile);
    }

    /// Free `tile` and hand it down the chain of queued agents.
    fn vacate(&mut self, tile: Axial) {
        let mut next = Some(tile);
        while let Some(tile) = next.take() {
            if let Some(agent) = self.occupants.remove(&tile) {
                if self.positions.get(&agent) == Some(&tile) {
                    self.positions.remove(&agent);
                }
            }
            let Some(step) = self.queues.get_mut(&tile).and_then(VecDeque::pop_front) else {
                continue;
            };
            if self.queues.get(&tile).is_some_and(VecDeque::is_empty) {
                self.queues.remove(&tile);
            }
            let Some(state) = self.steps.get_mut(step) else {
                continue;
            };
            state.phase = Phase::Granted;
            let (agent, holding) = (state.agent, state.holding);
            self.waiting.remove(&agent);
            self.occupy(agent, tile);
            self.granted.push((agent, tile));
            tracing::debug!(agent = ?agent, tile = %tile, "queued agent granted");
            if let Some(held) = holding {
                if held != tile && self.occupants.get(&held) == Some(&agent) {
                    next = Some(held);
                }
            }
        }
    }

    fn finish(&mut self, step: QueueStep, phase: Phase) {
        let Some(state) = self.steps.get_mut(step) else {
            return;
        };
        state.phase = phase;
        let (agent, to) = (state.agent, state.to);
        self.waiting.remove(&agent);
        if let Some(queue) = self.queues.get_mut(&to) {
            queue.retain(|&s| s != step);
            if queue.is_empty() {
                self.queues.remove(&to);
            }
        }
    }

    fn purge_finished(&mut self, agent: AgentId) {
        self.steps
            .retain(|_, s| s.agent != agent || s.phase == Phase::Waiting);
    }

    /// Follow occupant → pending destination → occupant from `to`. Returns
    /// the agents forming a loop, if the chain revisits one. Only agents that
    /// hold a tile while waiting can close a loop.
    fn circular_wait(&self, mover: AgentId, to: Axial) -> Option<Vec<AgentId>> {
        let mut trace = vec![mover];
        let mut tile = to;
        loop {
            let occupant = self.occupant(tile)?;
            if let Some(pos) = trace.iter().position(|&a| a == occupant) {
                return Some(trace.split_off(pos));
            }
            trace.push(occupant);
            tile = self.waiting_for(occupant)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: AgentId = AgentId(1);
    const B: AgentId = AgentId(2);
    const C: AgentId = AgentId(3);
    const D: AgentId = AgentId(4);

    fn t(q: i32) -> Axial {
        Axial::new(q, 0)
    }

    fn queued(outcome: MoveOutcome) -> QueueStep {
        match outcome {
            MoveOutcome::Queued(step) => step,
            other => panic!("expected Queued, got {other:?}"),
        }
    }

    #[test]
    fn free_tile_is_taken_immediately() {
        let mut board = Board::new();
        assert_eq!(board.move_character(&A, t(0), None).unwrap(), MoveOutcome::Moved);
        assert_eq!(board.occupant(t(0)), Some(A));
        assert_eq!(board.move_character(&A, t(1), Some(t(0))).unwrap(), MoveOutcome::Moved);
        assert_eq!(board.occupant(t(0)), None);
        assert_eq!(board.position(A), Some(t(1)));
    }

    #[test]
    fn placed_agent_may_move_without_from() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        assert_eq!(board.move_character(&A, t(3), None).unwrap(), MoveOutcome::Moved);
        assert_eq!(board.occupant(t(0)), None);
        assert_eq!(board.occupant(t(3)), Some(A));
    }

    #[test]
    fn queued_request_releases_from_at_once() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        board.move_character(&C, t(2), None).unwrap();
        queued(board.move_character(&C, t(0), None).unwrap());

        let a = queued(board.move_character(&A, t(1), Some(t(0))).unwrap());
        assert_eq!(board.position(A), None);
        // A's tile went to the head of its queue.
        assert_eq!(board.occupant(t(0)), Some(C));
        assert_eq!(board.occupant(t(2)), None);

        board.move_character(&B, t(5), Some(t(1))).unwrap();
        assert_eq!(board.poll(a), Some(StepStatus::Granted));
        assert_eq!(board.occupant(t(1)), Some(A));
    }

    #[test]
    fn holding_request_keeps_tile_until_granted() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        let a = queued(board.move_character(&A, t(1), None).unwrap());
        assert_eq!(board.occupant(t(0)), Some(A));
        assert_eq!(board.waiting_for(A), Some(t(1)));

        board.move_character(&B, t(9), Some(t(1))).unwrap();
        assert_eq!(board.poll(a), Some(StepStatus::Granted));
        assert_eq!(board.occupant(t(1)), Some(A));
        assert_eq!(board.occupant(t(0)), None);
    }

    #[test]
    fn queue_is_fifo() {
        let mut board = Board::new();
        board.move_character(&D, t(0), None).unwrap();
        board.move_character(&A, t(1), None).unwrap();
        board.move_character(&B, t(2), None).unwrap();
        board.move_character(&C, t(3), None).unwrap();
        let a = queued(board.move_character(&A, t(0), Some(t(1))).unwrap());
        let b = queued(board.move_character(&B, t(0), Some(t(2))).unwrap());
        let c = queued(board.move_character(&C, t(0), Some(t(3))).unwrap());
        assert_eq!(board.queue(t(0)), vec![A, B, C]);
        assert_eq!(board.poll(c), Some(StepStatus::Waiting { position: 2 }));
        assert_eq!(board.occupant(t(1)), None);

        board.move_character(&D, t(9), Some(t(0))).unwrap();
        assert_eq!(board.occupant(t(0)), Some(A));
        assert_eq!(board.poll(a), Some(StepStatus::Granted));

        board.move_character(&A, t(1), Some(t(0))).unwrap();
        assert_eq!(board.occupant(t(0)), Some(B));
        assert_eq!(board.poll(b), Some(StepStatus::Granted));

        board.move_character(&B, t(2), Some(t(0))).unwrap();
        assert_eq!(board.occupant(t(0)), Some(C));
        assert_eq!(board.drain_granted(), vec![(A, t(0)), (B, t(0)), (C, t(0))]);
    }

    #[test]
    fn grant_cascades_through_held_tiles() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        board.move_character(&C, t(2), None).unwrap();
        // C holds its tile and waits for B's, B holds and waits for A's.
        queued(board.move_character(&C, t(1), None).unwrap());
        queued(board.move_character(&B, t(0), None).unwrap());
        board.move_character(&A, t(5), Some(t(0))).unwrap();
        assert_eq!(board.occupant(t(0)), Some(B));
        assert_eq!(board.occupant(t(1)), Some(C));
        assert_eq!(board.occupant(t(2)), None);
    }

    #[test]
    fn swap_while_holding_is_a_circular_wait() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        let a = queued(board.move_character(&A, t(1), None).unwrap());
        let outcome = board.move_character(&B, t(0), None).unwrap();
        assert_eq!(outcome, MoveOutcome::Deadlock { released: vec![A] });
        assert_eq!(board.poll(a), Some(StepStatus::Released));
        assert!(board.queue(t(1)).is_empty());
        assert_eq!(board.occupant(t(0)), Some(A));
        assert_eq!(board.occupant(t(1)), Some(B));
    }

    #[test]
    fn swap_with_release_completes() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        let a = queued(board.move_character(&A, t(1), Some(t(0))).unwrap());
        let outcome = board.move_character(&B, t(0), Some(t(1))).unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);
        assert_eq!(board.poll(a), Some(StepStatus::Granted));
        assert_eq!(board.occupant(t(0)), Some(B));
        assert_eq!(board.occupant(t(1)), Some(A));
    }

    #[test]
    fn three_way_circular_wait_releases_all_queued() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        board.move_character(&C, t(2), None).unwrap();
        queued(board.move_character(&A, t(1), None).unwrap());
        queued(board.move_character(&B, t(2), None).unwrap());
        let MoveOutcome::Deadlock { released } = board.move_character(&C, t(0), None).unwrap()
        else {
            panic!("expected deadlock");
        };
        assert_eq!(released, vec![A, B]);
        assert_eq!(board.waiting_for(A), None);
        assert_eq!(board.waiting_for(B), None);
    }

    #[test]
    fn chain_without_loop_still_queues() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&B, t(1), None).unwrap();
        board.move_character(&C, t(2), None).unwrap();
        queued(board.move_character(&B, t(0), None).unwrap());
        let c = queued(board.move_character(&C, t(1), None).unwrap());
        assert_eq!(board.poll(c), Some(StepStatus::Waiting { position: 0 }));
        assert_eq!(board.waiting_for(C), Some(t(1)));
    }

    #[test]
    fn cancel_is_always_safe() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        let b = queued(board.move_character(&B, t(0), None).unwrap());
        board.cancel(b);
        board.cancel(b);
        assert_eq!(board.poll(b), Some(StepStatus::Cancelled));
        board.move_character(&A, t(1), Some(t(0))).unwrap();
        assert_eq!(board.occupant(t(0)), None);
    }

    #[test]
    fn releasing_a_tile_you_do_not_hold_fails() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        let err = board.move_character(&B, t(1), Some(t(0))).unwrap_err();
        assert_eq!(
            err,
            BoardError::NotOccupant {
                agent: B,
                tile: t(0)
            }
        );
        assert_eq!(board.occupant(t(1)), None);
    }

    #[test]
    fn remove_agent_promotes_queue_head() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        let b = queued(board.move_character(&B, t(0), None).unwrap());
        board.remove_agent(A).unwrap();
        assert_eq!(board.occupant(t(0)), Some(B));
        assert_eq!(board.poll(b), Some(StepStatus::Granted));
        assert_eq!(board.remove_agent(A), Err(BoardError::UnknownAgent(A)));
    }

    #[test]
    fn requeueing_cancels_earlier_request() {
        let mut board = Board::new();
        board.move_character(&A, t(0), None).unwrap();
        board.move_character(&C, t(1), None).unwrap();
        let first = queued(board.move_character(&B, t(0), None).unwrap());
        let second = queued(board.move_character(&B, t(1), None).unwrap());
        assert_eq!(board.poll(first), None);
        assert_eq!(board.poll(second), Some(StepStatus::Waiting { position: 0 }));
        assert!(board.queue(t(0)).is_empty());
    }
}
