pub mod buffer_pool_manager;
pub mod buffer_pool_manager_instance;
pub mod lru_replacer;
pub mod parallel_buffer_pool_manager;
