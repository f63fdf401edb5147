use crate::define_id_type;

define_id_type!(TaskId, u64);
define_id_type!(JobId, u64);
define_id_type!(ResourceId, u64);

// Flow-graph-local identifiers. They are never reused within the lifetime
// of a graph; change records may reference ids of already removed nodes.
define_id_type!(NodeId, u64);
define_id_type!(ArcId, u64);

// Derived from a 64-bit hash of a job id (task aggregators) or of a
// machine type signature (machine aggregators).
define_id_type!(EquivClassId, u64);
