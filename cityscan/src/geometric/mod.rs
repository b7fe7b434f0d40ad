pub mod contour;
pub mod contour_plan;
pub mod dem;
pub mod elevation_stats;
