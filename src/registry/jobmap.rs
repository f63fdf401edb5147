use crate::registry::job::Job;
use crate::{JobId, Map};

#[derive(Default, Debug)]
pub struct JobMap {
    jobs: Map<JobId, Job>,
}

impl JobMap {
    #[inline]
    pub fn insert(&mut self, job: Job) {
        let job_id = job.id;
        assert!(
            self.jobs.insert(job_id, job).is_none(),
            "Duplicate job id={job_id}"
        );
    }

    #[inline]
    pub fn remove(&mut self, job_id: JobId) -> Option<Job> {
        self.jobs.remove(&job_id)
    }

    #[inline]
    pub fn get_job(&self, job_id: JobId) -> &Job {
        self.jobs.get(&job_id).unwrap_or_else(|| {
            panic!("Asking for invalid job id={job_id}");
        })
    }

    #[inline]
    pub fn get_job_mut(&mut self, job_id: JobId) -> &mut Job {
        self.jobs.get_mut(&job_id).unwrap_or_else(|| {
            panic!("Asking for invalid job id={job_id}");
        })
    }

    #[inline]
    pub fn find_job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    #[inline]
    pub fn find_job_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    #[inline]
    pub fn job_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs.keys().copied()
    }

    #[inline]
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
