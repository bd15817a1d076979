pub mod rate_limit;

pub use rate_limit::check_connect_rate;
