//! Common test utilities for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use gradsync_comm::{
    named, CommConfig, Communicator, GradientRegistry, ProcessGroup, Result, SimGradient,
    SimMember, SimWorld,
};
use gradsync_core::DeviceId;

/// Runs `f` once per member, each on its own thread, and returns the results
/// in rank order.
pub fn run_ranks<F, T>(members: &[SimMember], f: F) -> Vec<T>
where
    F: Fn(&SimMember) -> T + Sync,
    T: Send,
{
    thread::scope(|s| {
        let handles: Vec<_> = members
            .iter()
            .map(|member| {
                let f = &f;
                s.spawn(move || f(member))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Bootstraps a communicator for `member` over its own process group.
pub fn init(member: &SimMember, config: CommConfig) -> Result<Communicator> {
    init_with(&member.group, member, config)
}

/// Bootstraps a communicator for `member` over `group`.
pub fn init_with(
    group: &dyn ProcessGroup,
    member: &SimMember,
    config: CommConfig,
) -> Result<Communicator> {
    Communicator::init(
        group,
        member.accelerator.clone(),
        member.engine.clone(),
        config,
    )
}

/// Builds a single-context registry named `p0`, `p1`, ... for `member`.
pub fn registry(member: &SimMember, values: &[Vec<f32>]) -> (GradientRegistry, Vec<Arc<SimGradient>>) {
    let names: Vec<String> = (0..values.len()).map(|i| format!("p{i}")).collect();
    registry_named(member, &names, values)
}

/// Builds a single-context registry with explicit names.
pub fn registry_named(
    member: &SimMember,
    names: &[String],
    values: &[Vec<f32>],
) -> (GradientRegistry, Vec<Arc<SimGradient>>) {
    let rank = member.group.rank().expect("rank");
    let grads: Vec<Arc<SimGradient>> = values.iter().map(|v| member.gradient(v.clone())).collect();
    let entries = names
        .iter()
        .zip(&grads)
        .map(|(name, grad)| named(name.clone(), grad.clone()))
        .collect();
    let registry =
        GradientRegistry::single(DeviceId(rank), entries).expect("Failed to build registry");
    (registry, grads)
}

/// Reads every gradient back.
pub fn values(grads: &[Arc<SimGradient>]) -> Vec<Vec<f32>> {
    grads
        .iter()
        .map(|g| g.to_vec().expect("Failed to read gradient"))
        .collect()
}

/// Creates a world of `n` ranks.
pub fn world(n: usize) -> Vec<SimMember> {
    SimWorld::new(n).into_members()
}
