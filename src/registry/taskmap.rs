use crate::registry::task::Task;
use crate::{Map, TaskId};

#[derive(Default, Debug)]
pub struct TaskMap {
    tasks: Map<TaskId, Task>,
}

impl TaskMap {
    #[inline]
    pub fn insert(&mut self, task: Task) {
        let task_id = task.id;
        assert!(
            self.tasks.insert(task_id, task).is_none(),
            "Duplicate task id={task_id}"
        );
    }

    #[inline]
    pub fn remove(&mut self, task_id: TaskId) -> Option<Task> {
        self.tasks.remove(&task_id)
    }

    #[inline]
    pub fn get_task(&self, task_id: TaskId) -> &Task {
        self.tasks.get(&task_id).unwrap_or_else(|| {
            panic!("Asking for invalid task id={task_id}");
        })
    }

    #[inline]
    pub fn get_task_mut(&mut self, task_id: TaskId) -> &mut Task {
        self.tasks.get_mut(&task_id).unwrap_or_else(|| {
            panic!("Asking for invalid task id={task_id}");
        })
    }

    #[inline]
    pub fn find_task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    #[inline]
    pub fn find_task_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    #[inline]
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    #[inline]
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
