use candle_core::Tensor;

/// A batch of sampled trajectories, stored time-major and padded with dummy
/// actions once a trajectory has exited.
///
/// The state at `(t, b)` is the source of the action at `(t, b)` and the state at
/// `(t + 1, b)` is its target.
pub trait Trajectories {
    /// `(max_len + 1, n_traj, *state_shape)`
    fn states(&self) -> &Tensor;

    /// `(max_len, n_traj, *action_shape)`
    fn actions(&self) -> &Tensor;

    /// `(max_len, n_traj)` u8, 1 where the action is padding.
    fn is_dummy_action(&self) -> &Tensor;

    /// `(max_len, n_traj)` u8, 1 where the action is the exit action.
    fn is_exit_action(&self) -> &Tensor;

    /// `(n_traj,)`
    fn log_rewards(&self) -> &Tensor;

    /// Forward log-probabilities recorded while sampling, `(max_len, n_traj)`.
    fn log_probs(&self) -> Option<&Tensor> {
        None
    }

    fn max_length(&self) -> usize {
        self.actions().dims().first().copied().unwrap_or(0)
    }

    fn n_trajectories(&self) -> usize {
        self.actions().dims().get(1).copied().unwrap_or(0)
    }
}
