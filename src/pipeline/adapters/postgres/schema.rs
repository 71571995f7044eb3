//! Diesel schema for task tree persistence.

diesel::table! {
    /// Task tree nodes, one row per node.
    pipeline_run_tasks (id) {
        /// Node identifier.
        id -> Int8,
        /// Owning pipeline run.
        run_id -> Int8,
        /// Registered task identifier.
        task_id -> Int4,
        /// Parent node identifier; 0 for the root.
        parent_id -> Int8,
        /// One-based position among siblings.
        sibling_order -> Int4,
        /// Workflow stage.
        #[max_length = 100]
        stage -> Varchar,
        /// Node status.
        #[max_length = 20]
        status -> Varchar,
        /// Start timestamp.
        started_at -> Nullable<Timestamptz>,
        /// Completion timestamp.
        completed_at -> Nullable<Timestamptz>,
        /// Outcome message.
        message -> Nullable<Text>,
        /// Failure diagnostic.
        diagnostic -> Nullable<Text>,
        /// Opaque rendering payload.
        render_payload -> Nullable<Jsonb>,
    }
}
