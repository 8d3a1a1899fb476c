use color_eyre::eyre::eyre;
use color_eyre::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    NotInitialized,
    Initialized,
    Running,
    Stopped,
}

/// Tracks where an application is in its one-way initialize/run/stop sequence
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::NotInitialized,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::NotInitialized => {
                self.state = LifecycleState::Initialized;
                Ok(())
            }
            state => Err(eyre!("initialize() may only be called once (app is {:?})", state)),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Initialized => {
                self.state = LifecycleState::Running;
                Ok(())
            }
            LifecycleState::NotInitialized => Err(eyre!("run() called before initialize()")),
            LifecycleState::Running => Err(eyre!("run() called while already running")),
            LifecycleState::Stopped => Err(eyre!("run() called after the app stopped")),
        }
    }

    /// Final state, also entered when setup fails
    pub fn stop(&mut self) {
        self.state = LifecycleState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_through_states_in_order() {
        let mut lifecycle = Lifecycle::default();
        assert_eq!(lifecycle.state(), LifecycleState::NotInitialized);

        lifecycle.initialize().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);

        lifecycle.start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        lifecycle.stop();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[test]
    fn run_before_initialize_is_an_error() {
        let mut lifecycle = Lifecycle::default();
        let err = lifecycle.start().unwrap_err();
        assert!(err.to_string().contains("before initialize"));
        assert_eq!(lifecycle.state(), LifecycleState::NotInitialized);
    }

    #[test]
    fn initialize_only_once() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.initialize().unwrap();
        assert!(lifecycle.initialize().is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
    }

    #[test]
    fn no_way_back_from_stopped() {
        let mut lifecycle = Lifecycle::default();
        lifecycle.initialize().unwrap();
        lifecycle.start().unwrap();
        lifecycle.stop();

        assert!(lifecycle.start().is_err());
        assert!(lifecycle.initialize().is_err());
    }
}
