//! Command execution for the mock server.
//!
//! Every operation checks everything before touching the world, so a
//! failed command never leaves partial changes behind. `do_all` runs its
//! sub-requests against a scratch copy and commits only if all succeed.

use std::collections::BTreeSet;

use crate::protocol::{ErrorInfo, IdMap, Request, Response, Success};

use super::graph::{is_container_type, ObjRef};
use super::state::{Caller, Privilege, World};

type OpResult = Result<Success, ErrorInfo>;

/// Execute `request` on behalf of `caller`.
pub fn execute(world: &mut World, caller: &Caller, request: &Request) -> Response {
    let result = match request {
        Request::Delete { targets, dry_run } => delete(world, caller, targets, *dry_run),
        Request::Chgrp { targets, group_id } => chgrp(world, caller, targets, *group_id),
        Request::Chown { targets, user_id } => chown(world, caller, targets, *user_id),
        Request::FindParents {
            targets,
            parent_types,
            stop_before,
        } => find(world, caller, targets, parent_types, stop_before, true),
        Request::FindChildren {
            targets,
            child_types,
            stop_before,
        } => find(world, caller, targets, child_types, stop_before, false),
        Request::RawAccess { repo, command, args } => raw_access(world, caller, repo, command, args),
        Request::DoAll { requests } => return do_all(world, caller, requests),
    };
    match result {
        Ok(success) => Response::Ok(success),
        Err(info) => Response::Err(info),
    }
}

fn missing(obj: &ObjRef) -> ErrorInfo {
    ErrorInfo::new("graph", "missing-object")
        .with_param("type", obj.type_name.clone())
        .with_param("id", obj.id.to_string())
}

fn not_permitted(operation: &str) -> ErrorInfo {
    ErrorInfo::new("security", "not-permitted").with_param("operation", operation)
}

/// Resolve targets to objects the caller can see in the current scope.
fn resolve(world: &World, caller: &Caller, targets: &IdMap) -> Result<BTreeSet<ObjRef>, ErrorInfo> {
    let mut roots = BTreeSet::new();
    for (type_name, ids) in targets.iter() {
        for &id in ids {
            let obj = ObjRef::new(type_name, id);
            match world.graph.get(&obj) {
                Some(ownership) if caller.sees(ownership) => {
                    roots.insert(obj);
                }
                _ => return Err(missing(&obj)),
            }
        }
    }
    Ok(roots)
}

fn id_map(objs: &BTreeSet<ObjRef>) -> IdMap {
    let mut map = IdMap::new();
    for obj in objs {
        map.insert(obj.type_name.clone(), obj.id);
    }
    map
}

fn delete(world: &mut World, caller: &Caller, targets: &IdMap, dry_run: bool) -> OpResult {
    let roots = resolve(world, caller, targets)?;
    let doomed = world.graph.closure(&roots);

    if !caller.user.has(Privilege::Delete) {
        for obj in &doomed {
            let owned = world.graph.get(obj).map(|o| o.owner) == Some(caller.user.id);
            if !owned {
                return Err(not_permitted("delete").with_param("object", obj.to_string()));
            }
        }
    }

    let mut deleted = id_map(&doomed);
    let mut link_ids = BTreeSet::new();
    for obj in &doomed {
        for (id, link) in world.graph.links_touching(obj) {
            if link_ids.insert(id) {
                deleted.insert(link.link_type, id);
            }
        }
    }

    if dry_run {
        return Ok(Success {
            objects: IdMap::new(),
            deleted,
        });
    }

    for id in link_ids {
        world.graph.remove_link(id);
    }
    for obj in &doomed {
        world.graph.remove(obj);
        if obj.type_name == "OriginalFile" {
            // A record whose bytes are already gone deletes cleanly
            world.files.remove(&obj.id);
        }
    }

    Ok(Success {
        objects: IdMap::new(),
        deleted,
    })
}

fn chgrp(world: &mut World, caller: &Caller, targets: &IdMap, group_id: i64) -> OpResult {
    if !world.groups.contains_key(&group_id) {
        return Err(ErrorInfo::new("graph", "no-such-group").with_param("group", group_id.to_string()));
    }
    let roots = resolve(world, caller, targets)?;
    let moving = world.graph.closure(&roots);

    let user = &caller.user;
    if !user.has(Privilege::Chgrp) {
        if !user.member_of(group_id) {
            return Err(not_permitted("chgrp").with_param("group", group_id.to_string()));
        }
        for obj in &moving {
            if world.graph.get(obj).map(|o| o.owner) != Some(user.id) {
                return Err(not_permitted("chgrp").with_param("object", obj.to_string()));
            }
        }
    }

    // Links would end up spanning two groups; they are dropped instead
    let mut deleted = IdMap::new();
    let mut stale_links = BTreeSet::new();
    for obj in &moving {
        for (id, link) in world.graph.links_touching(obj) {
            let other = if &link.parent == obj { &link.annotation } else { &link.parent };
            let other_group = world.graph.get(other).map(|o| o.group);
            if !moving.contains(other) && other_group != Some(group_id) && stale_links.insert(id) {
                deleted.insert(link.link_type, id);
            }
        }
    }

    for id in stale_links {
        world.graph.remove_link(id);
    }
    for obj in &moving {
        if let Some(ownership) = world.graph.get_mut(obj) {
            ownership.group = group_id;
        }
    }

    Ok(Success {
        objects: id_map(&moving),
        deleted,
    })
}

fn chown(world: &mut World, caller: &Caller, targets: &IdMap, user_id: i64) -> OpResult {
    if !caller.user.has(Privilege::Chown) {
        return Err(not_permitted("chown").with_param("privilege", "Chown"));
    }
    if !world.users.contains_key(&user_id) {
        return Err(ErrorInfo::new("graph", "no-such-user").with_param("user", user_id.to_string()));
    }
    let roots = resolve(world, caller, targets)?;
    let giving = world.graph.closure(&roots);

    for obj in &giving {
        if let Some(ownership) = world.graph.get_mut(obj) {
            ownership.owner = user_id;
        }
    }

    Ok(Success {
        objects: id_map(&giving),
        deleted: IdMap::new(),
    })
}

fn find(
    world: &World,
    caller: &Caller,
    targets: &IdMap,
    types: &[String],
    stop_before: &[String],
    upward: bool,
) -> OpResult {
    if types.is_empty() {
        return Err(ErrorInfo::new("graph", "no-target-types"));
    }
    let named = types
        .iter()
        .chain(stop_before.iter())
        .map(String::as_str)
        .chain(targets.type_names());
    for type_name in named {
        if !is_container_type(type_name) {
            return Err(ErrorInfo::new("graph", "unknown-type").with_param("type", type_name));
        }
    }

    let roots: Vec<ObjRef> = resolve(world, caller, targets)?.into_iter().collect();
    let wanted: BTreeSet<String> = types.iter().cloned().collect();
    let stop: BTreeSet<String> = stop_before.iter().cloned().collect();

    let found = world.graph.find(&roots, &wanted, &stop, upward, |obj| {
        world.graph.get(obj).map(|o| caller.sees(o)).unwrap_or(false)
    });

    Ok(Success {
        objects: found,
        deleted: IdMap::new(),
    })
}

fn raw_access(world: &mut World, caller: &Caller, repo: &str, command: &str, args: &[String]) -> OpResult {
    if !caller.user.is_admin() {
        return Err(not_permitted("raw_access").with_param("repo", repo));
    }
    let paths = world
        .repos
        .get_mut(repo)
        .ok_or_else(|| ErrorInfo::new("repo", "unknown-repo").with_param("repo", repo))?;
    let path = match args {
        [path] => path,
        _ => {
            return Err(ErrorInfo::new("repo", "bad-arguments")
                .with_param("command", command)
                .with_param("expected", "1")
                .with_param("given", args.len().to_string()))
        }
    };

    match command {
        "mkdir" | "touch" => {
            if !paths.insert(path.clone()) {
                return Err(ErrorInfo::new("repo", "path-exists").with_param("path", path.clone()));
            }
        }
        "rm" => {
            let prefix = format!("{}/", path);
            if paths.iter().any(|p| p.starts_with(&prefix)) {
                return Err(ErrorInfo::new("repo", "not-empty").with_param("path", path.clone()));
            }
            if !paths.remove(path) {
                return Err(ErrorInfo::new("repo", "no-such-path").with_param("path", path.clone()));
            }
        }
        other => {
            return Err(ErrorInfo::new("repo", "unknown-command").with_param("command", other));
        }
    }

    Ok(Success::default())
}

fn do_all(world: &mut World, caller: &Caller, requests: &[Request]) -> Response {
    let mut scratch = world.clone();
    let mut responses = Vec::with_capacity(requests.len());
    let mut failed = false;

    for (index, request) in requests.iter().enumerate() {
        if failed {
            responses.push(Response::Err(
                ErrorInfo::new("do-all", "skipped").with_param("index", index.to_string()),
            ));
            continue;
        }
        let response = execute(&mut scratch, caller, request);
        failed = response.is_error();
        responses.push(response);
    }

    if !failed {
        *world = scratch;
    }
    Response::DoAll { responses }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::graph::Ownership;
    use crate::mock::state::{GroupScope, Group, User};

    fn world() -> (World, Caller) {
        let mut world = World::default();
        world.groups.insert(1, Group { id: 1, name: "lab".to_string() });
        let user = User {
            id: 10,
            name: "alice".to_string(),
            groups: BTreeSet::from([1]),
            default_group: 1,
            privileges: BTreeSet::new(),
        };
        world.users.insert(10, user.clone());
        let caller = Caller {
            user,
            scope: GroupScope::One(1),
        };
        (world, caller)
    }

    fn add(world: &mut World, type_name: &str, id: i64) -> ObjRef {
        let obj = ObjRef::new(type_name, id);
        world.graph.insert(obj.clone(), Ownership { owner: 10, group: 1 });
        obj
    }

    #[test]
    fn test_find_rejects_empty_and_unknown_types() {
        let (mut world, caller) = world();
        add(&mut world, "Image", 1);

        let empty = execute(&mut world, &caller, &Request::find_parents("Image", [1], &[]));
        assert!(empty.error().unwrap().is("graph", "no-target-types"));

        let unknown = execute(
            &mut world,
            &caller,
            &Request::find_parents("Image", [1], &["Project", "Event"]),
        );
        let info = unknown.error().unwrap();
        assert!(info.is("graph", "unknown-type"));
        assert_eq!(info.param("type"), Some("Event"));
    }

    #[test]
    fn test_delete_missing_object_changes_nothing() {
        let (mut world, caller) = world();
        add(&mut world, "Image", 1);

        let request = Request::Delete {
            targets: [("Image", vec![1, 2])].into_iter().collect(),
            dry_run: false,
        };
        let response = execute(&mut world, &caller, &request);
        assert!(response.error().unwrap().is("graph", "missing-object"));
        assert!(world.graph.contains(&ObjRef::new("Image", 1)));
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let (mut world, caller) = world();
        let image = add(&mut world, "Image", 1);
        let pixels = add(&mut world, "Pixels", 2);
        world.graph.add_edge(&image, &pixels);

        let response = execute(&mut world, &caller, &Request::delete("Image", [1]).dry_run());
        assert_eq!(response.success().unwrap().deleted.ids("Pixels"), &[2]);
        assert!(world.graph.contains(&pixels));
    }

    #[test]
    fn test_raw_access_requires_admin() {
        let (mut world, caller) = world();
        world.repos.insert("managed".to_string(), BTreeSet::new());

        let response = execute(&mut world, &caller, &Request::raw_access("managed", "mkdir", &["a"]));
        assert!(response.error().unwrap().is("security", "not-permitted"));
    }

    #[test]
    fn test_do_all_rolls_back_on_failure() {
        let (mut world, caller) = world();
        add(&mut world, "Image", 1);

        let response = execute(
            &mut world,
            &caller,
            &Request::do_all(vec![
                Request::delete("Image", [1]),
                Request::delete("Image", [99]),
                Request::delete("Image", [1]),
            ]),
        );
        let subs = response.sub_responses().unwrap();
        assert_eq!(subs.len(), 3);
        assert!(!subs[0].is_error());
        assert!(subs[1].error().unwrap().is("graph", "missing-object"));
        assert!(subs[2].error().unwrap().is("do-all", "skipped"));
        assert!(world.graph.contains(&ObjRef::new("Image", 1)));
    }
}
