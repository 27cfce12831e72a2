pub mod cache;
pub mod coverage;
pub mod debug;
pub mod edge_disambiguator;
pub mod graph_store;
pub mod io;
pub mod mapmatcher;
pub mod osm_preprocessing;
pub mod route_assembler;
pub mod snapping;
pub mod track;
pub mod valhalla;
pub mod way_resolver;
