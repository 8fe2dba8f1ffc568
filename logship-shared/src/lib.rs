/// The remote log service seam: wire types, the service trait and its error taxonomy.
pub mod logs;
