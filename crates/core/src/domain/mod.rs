pub mod datasource;
pub mod intent;
pub mod record;
pub mod rule;
pub mod tenant;
pub mod verdict;
