//! The built-in node library: the node types every workflow can draw on
//! without a custom registration step, wired into a [`NodeRegistry`] by
//! [`register_all`].

mod answer;
mod classify;
mod conditional_router;
mod context_guard;
mod iteration_gate;
mod llm_call;
mod memory;
mod post_model;
mod todos;
mod util;

use langgraph_core::workflow_engine::registry::NodeRegistry;

/// Register every built-in node type into `registry`. Call once at process
/// start, before compiling any workflow that references these types.
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(context_guard::node_type());
    registry.register(post_model::node_type());
    registry.register(iteration_gate::node_type());
    registry.register(conditional_router::node_type());
    registry.register(classify::node_type());
    registry.register(answer::direct_answer_node_type());
    registry.register(answer::answer_node_type());
    registry.register(answer::review_node_type());
    registry.register(todos::create_todos_node_type());
    registry.register(todos::execute_todo_node_type());
    registry.register(todos::check_progress_node_type());
    registry.register(todos::final_review_node_type());
    registry.register(todos::final_answer_node_type());
    registry.register(memory::memory_inject_node_type());
    registry.register(memory::transcript_record_node_type());
    registry.register(llm_call::node_type());

    registry.register_alias("call_model", "llm_call");
}
