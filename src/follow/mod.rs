pub mod connection;
pub mod follower;

pub use follower::{FollowOpts, FollowerHandle, FollowerSettings, LogFollower};
