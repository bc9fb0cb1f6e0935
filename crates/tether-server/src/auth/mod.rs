//! Agent registration authorization
//!
//! Agents present a registration token and, for node agents, the node
//! they run on. The authorizer turns those headers into the session key
//! the agent's transport is registered under.

mod tokens;

pub use tokens::{
    AgentIdentity, Authorizer, TokenAuthorizer, NODE_HEADER, TOKEN_HEADER, VERSION_HEADER,
};
