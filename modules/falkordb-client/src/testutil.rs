//! Test utilities for spinning up a real FalkorDB instance via testcontainers.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

use crate::Session;

/// Start a FalkorDB container and open a session against it.
///
/// The container stops when the returned handle is dropped, so callers must
/// keep it alive for the duration of the test.
pub async fn falkordb_container() -> (ContainerAsync<GenericImage>, Session) {
    let container = GenericImage::new("falkordb/falkordb", "latest")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start FalkorDB container");

    let host_port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get FalkorDB host port");

    let session = Session::connect(&format!("falkor://127.0.0.1:{host_port}"))
        .await
        .expect("Failed to connect to FalkorDB");

    (container, session)
}
