use std::collections::BTreeMap;

use crate::domain::resource::quantity::ResourceVector;
use crate::domain::scheduler::ledger::{LedgerState, Reservation, ReservationId};
use crate::domain::scheduler::placement::{PlacementRequest, place};
use crate::domain::utils::id::{NodeName, PoolName};

/// Preemptible reservations that may make room for `pool`, in the order they are taken:
/// own pool first, then (if allowed) other pools; lowest priority, oldest reservation and
/// lowest sequence first within that.
pub fn candidates(state: &LedgerState, pool: &PoolName, cross_pool: bool) -> Vec<ReservationId> {
    let mut found: Vec<(ReservationId, &Reservation)> =
        state.reservations().filter(|(_, r)| r.preemptible && (cross_pool || &r.pool == pool)).collect();
    found.sort_by(|(_, a), (_, b)| {
        (&a.pool != pool)
            .cmp(&(&b.pool != pool))
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.reserved_at.cmp(&b.reserved_at))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    found.into_iter().map(|(id, _)| id).collect()
}

fn with_released(state: &LedgerState, victims: &[ReservationId]) -> BTreeMap<NodeName, ResourceVector> {
    let mut free = state.free().clone();
    for placement in victims.iter().filter_map(|id| state.reservation(*id)).flat_map(|r| r.placements.iter()) {
        if let Some(slot) = free.get_mut(&placement.node) {
            *slot += placement.request;
        }
    }
    free
}

/// Smallest greedy victim set that lets `requests` be placed.
///
/// Candidates are added in order until a trial placement succeeds, then every victim whose
/// release turns out unnecessary is dropped again, newest first. `None` if even releasing all
/// candidates is not enough.
pub fn select_victims(state: &LedgerState, requests: &[PlacementRequest], ordered: &[ReservationId]) -> Option<Vec<ReservationId>> {
    let mut victims = Vec::new();
    let mut placed = false;
    for id in ordered {
        victims.push(*id);
        if place(requests, &with_released(state, &victims)).is_some() {
            placed = true;
            break;
        }
    }
    if !placed {
        return None;
    }

    for index in (0..victims.len()).rev() {
        let mut trial = victims.clone();
        trial.remove(index);
        if place(requests, &with_released(state, &trial)).is_some() {
            victims = trial;
        }
    }
    Some(victims)
}
