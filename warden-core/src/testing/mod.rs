//! Testing utilities and mocks
//!
//! Provides mock implementations of the external collaborators for
//! integration tests and a simulated transport for demo binaries:
//! - MockTransport / MockTransportFactory: scripted connections
//! - StaticDesiredState: in-memory tenant configuration
//! - SimulatedTransportFactory: randomized failures, hangs and wipes

pub mod mock_transport;
pub mod simulated;

pub use mock_transport::{
    test_endpoint, test_server_info, ConnectOutcome, MockTransport, MockTransportFactory,
    ProbeBehavior, StaticDesiredState,
};
pub use simulated::{SimulatedTransportFactory, SimulationConfig};
