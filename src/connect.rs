//! Connection management: tunnels, descriptors, backup database creation
//! and timezone checks.

pub mod descriptor;
pub mod timezone;
pub mod tunnel;

pub use descriptor::{
    backup_database_name, ensure_local_database, local_descriptor, remote_descriptor,
    ConnectionDescriptor, EndpointRole, MAX_IDENTIFIER_LEN,
};
pub use timezone::{effective_time_zone, verify_timezones};
pub use tunnel::{find_free_port, open_tunnel, tunnel_command, TunnelConfig, TunnelHandle};
