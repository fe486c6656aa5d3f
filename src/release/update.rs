use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use crate::cluster::LiveResource;
use crate::policy::Policies;
use super::images::{ImageSelector, Target};
use super::result::{ContainerUpdate, Reason, ResourceResult};

/// Decides the outcome for one resource that passed the filters.
///
/// An error for any container fails the resource. Otherwise any change makes it a
/// success listing only the changed containers, and a resource with no change is
/// skipped when its images are unknown or current, or ignored when the release
/// does not concern any of its containers.
pub fn calculate(selector: &ImageSelector, live: &LiveResource, policies: &Policies) -> ResourceResult {
    let mut updates = vec![];
    let mut not_found = false;
    let mut up_to_date = false;
    for container in &live.containers {
        match selector.select_target(container, policies) {
            Err(err) => return ResourceResult::failed(format!("container {}: {err}", container.name)),
            Ok(Target::Update(target)) => match container.image_id() {
                Ok(current) => updates.push(ContainerUpdate {
                    container: container.name.clone(),
                    current,
                    target,
                }),
                Err(err) => return ResourceResult::failed(format!("container {}: {err}", container.name)),
            },
            Ok(Target::NotFound) => not_found = true,
            Ok(Target::UpToDate) => up_to_date = true,
            Ok(Target::Unrelated) => {}
        }
    }

    if !updates.is_empty() {
        ResourceResult::success(updates)
    } else if not_found {
        ResourceResult::skipped(Reason::ImageNotFound)
    } else if up_to_date {
        ResourceResult::skipped(Reason::ImageUpToDate)
    } else {
        ResourceResult::ignored(Reason::DoesNotUseImage)
    }
}

/// [`calculate`], with a panic turned into a failure of this resource only.
pub fn calculate_isolated(selector: &ImageSelector, live: &LiveResource, policies: &Policies) -> ResourceResult {
    isolated(|| calculate(selector, live, policies))
}

fn isolated(calculation: impl FnOnce() -> ResourceResult) -> ResourceResult {
    catch_unwind(AssertUnwindSafe(calculation))
        .unwrap_or_else(|panic| ResourceResult::failed(format!("calculating update panicked: {}", panic_message(&*panic))))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}
