//! Role dashboards. Builders here are pure; handlers only fetch rows.

pub mod handlers;

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::allocations::{free_capacity, load_on};
use crate::models::allocation::AllocationRow;
use crate::models::project::{ProjectRow, RequiredSkillRow};
use crate::models::skill::UserSkillDetail;
use crate::models::user::{Availability, UserRow};
use crate::projects::staffing_coverage;
use crate::skills::SkillStat;

pub const TOP_SKILLS: usize = 10;
const NO_DEPARTMENT: &str = "unassigned";

#[derive(Debug, Clone, Serialize)]
pub struct AllocationSummary {
    pub allocation_id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub percentage: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeeDashboard {
    pub active_allocations: Vec<AllocationSummary>,
    pub current_load: i32,
    pub free_capacity: i32,
    pub availability: Availability,
    pub pending_work_requests: i64,
    pub unread_notifications: i64,
    pub skill_count: usize,
    pub desired_skill_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_id: Uuid,
    pub name: String,
    pub status: String,
    pub member_count: usize,
    pub allocated_percentage: i32,
    pub staffing_coverage: f64,
    pub uncovered_skills: Vec<String>,
    pub pending_resource_requests: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PmDashboard {
    pub projects: Vec<ProjectSummary>,
    pub pending_resource_requests: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportLoad {
    pub user_id: Uuid,
    pub name: String,
    pub job_title: Option<String>,
    pub current_load: i32,
    pub free_capacity: i32,
    pub availability: Availability,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerDashboard {
    pub reports: Vec<ReportLoad>,
    pub pending_work_requests: i64,
    pub pending_resource_requests: i64,
    pub pending_approvals: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentStat {
    pub department: String,
    pub headcount: usize,
    pub average_load: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchEntry {
    pub user_id: Uuid,
    pub name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HrDashboard {
    pub headcount: usize,
    pub departments: Vec<DepartmentStat>,
    /// Mean load across all users, in percent.
    pub average_utilisation: f64,
    pub bench: Vec<BenchEntry>,
    pub pending_hr_requests: i64,
    pub top_skills: Vec<SkillStat>,
}

pub fn summarize_allocations(
    allocations: &[AllocationRow],
    project_names: &HashMap<Uuid, String>,
    today: NaiveDate,
) -> Vec<AllocationSummary> {
    allocations
        .iter()
        .filter(|a| a.is_active_on(today))
        .map(|a| AllocationSummary {
            allocation_id: a.id,
            project_id: a.project_id,
            project_name: project_names.get(&a.project_id).cloned().unwrap_or_default(),
            percentage: a.percentage,
            start_date: a.start_date,
            end_date: a.end_date,
        })
        .collect()
}

pub struct EmployeeCounts {
    pub pending_work_requests: i64,
    pub unread_notifications: i64,
}

pub fn build_employee_dashboard(
    allocations: &[AllocationRow],
    project_names: &HashMap<Uuid, String>,
    skills: &[UserSkillDetail],
    counts: EmployeeCounts,
    today: NaiveDate,
) -> EmployeeDashboard {
    let current_load = load_on(allocations, today);
    let desired_skill_count = skills.iter().filter(|s| s.is_desired).count();
    EmployeeDashboard {
        active_allocations: summarize_allocations(allocations, project_names, today),
        current_load,
        free_capacity: free_capacity(current_load),
        availability: Availability::from_load(current_load),
        pending_work_requests: counts.pending_work_requests,
        unread_notifications: counts.unread_notifications,
        skill_count: skills.len() - desired_skill_count,
        desired_skill_count,
    }
}

/// One summary per project. `allocations` are the projects' active allocations,
/// `member_skills` the skills of those members.
pub fn build_pm_dashboard(
    projects: &[ProjectRow],
    allocations: &[AllocationRow],
    required: &[RequiredSkillRow],
    member_skills: &[UserSkillDetail],
    pending_by_project: &HashMap<Uuid, i64>,
) -> PmDashboard {
    let summaries: Vec<ProjectSummary> = projects
        .iter()
        .map(|project| {
            let members: Vec<&AllocationRow> = allocations
                .iter()
                .filter(|a| a.project_id == project.id)
                .collect();
            let mut member_ids: Vec<Uuid> = members.iter().map(|a| a.user_id).collect();
            member_ids.sort();
            member_ids.dedup();

            let project_required: Vec<RequiredSkillRow> = required
                .iter()
                .filter(|r| r.project_id == project.id)
                .cloned()
                .collect();
            let skills: Vec<UserSkillDetail> = member_skills
                .iter()
                .filter(|s| member_ids.contains(&s.user_id))
                .cloned()
                .collect();
            let coverage = staffing_coverage(&project_required, &skills);

            ProjectSummary {
                project_id: project.id,
                name: project.name.clone(),
                status: project.status.clone(),
                member_count: member_ids.len(),
                allocated_percentage: members.iter().map(|a| a.percentage).sum(),
                staffing_coverage: coverage.ratio,
                uncovered_skills: coverage
                    .skills
                    .into_iter()
                    .filter(|s| !s.covered)
                    .map(|s| s.skill_name)
                    .collect(),
                pending_resource_requests: pending_by_project
                    .get(&project.id)
                    .copied()
                    .unwrap_or(0),
            }
        })
        .collect();

    PmDashboard {
        pending_resource_requests: summaries.iter().map(|s| s.pending_resource_requests).sum(),
        projects: summaries,
    }
}

pub fn build_manager_dashboard(
    reports: &[UserRow],
    loads: &HashMap<Uuid, i32>,
    pending_work_requests: i64,
    pending_resource_requests: i64,
) -> ManagerDashboard {
    let reports = reports
        .iter()
        .map(|u| {
            let load = loads.get(&u.id).copied().unwrap_or(0);
            ReportLoad {
                user_id: u.id,
                name: u.name.clone(),
                job_title: u.job_title.clone(),
                current_load: load,
                free_capacity: free_capacity(load),
                availability: Availability::from_load(load),
            }
        })
        .collect();

    ManagerDashboard {
        reports,
        pending_work_requests,
        pending_resource_requests,
        pending_approvals: pending_work_requests + pending_resource_requests,
    }
}

pub fn build_hr_dashboard(
    users: &[UserRow],
    loads: &HashMap<Uuid, i32>,
    pending_hr_requests: i64,
    skills_by_holders: Vec<SkillStat>,
) -> HrDashboard {
    let load_of = |u: &UserRow| loads.get(&u.id).copied().unwrap_or(0);

    let mut by_department: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
    for user in users {
        let key = user.department.as_deref().unwrap_or(NO_DEPARTMENT);
        let entry = by_department.entry(key).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += i64::from(load_of(user));
    }
    let departments = by_department
        .into_iter()
        .map(|(department, (headcount, total))| DepartmentStat {
            department: department.to_string(),
            headcount,
            average_load: total as f64 / headcount as f64,
        })
        .collect();

    let average_utilisation = if users.is_empty() {
        0.0
    } else {
        users.iter().map(|u| f64::from(load_of(u))).sum::<f64>() / users.len() as f64
    };

    let bench = users
        .iter()
        .filter(|u| load_of(u) == 0)
        .map(|u| BenchEntry {
            user_id: u.id,
            name: u.name.clone(),
            department: u.department.clone(),
        })
        .collect();

    HrDashboard {
        headcount: users.len(),
        departments,
        average_utilisation,
        bench,
        pending_hr_requests,
        top_skills: skills_by_holders
            .into_iter()
            .filter(|s| s.holders > 0)
            .take(TOP_SKILLS)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::allocations::test_support::{allocation, day};
    use crate::projects::test_support::{held, required};

    fn user(name: &str, department: Option<&str>) -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            external_id: format!("oauth|{name}"),
            email: format!("{name}@example.com"),
            name: name.to_string(),
            role: "employee".to_string(),
            department: department.map(str::to_string),
            job_title: None,
            availability: "available".to_string(),
            manager_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn project(name: &str) -> ProjectRow {
        ProjectRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            status: "active".to_string(),
            pm_id: Uuid::new_v4(),
            start_date: day(2025, 1, 1),
            end_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_employee_dashboard_counts_active_only() {
        let me = Uuid::new_v4();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let allocs = vec![
            allocation(me, p1, 60, day(2025, 1, 1), day(2025, 6, 30)),
            allocation(me, p2, 30, day(2025, 7, 1), day(2025, 12, 31)),
        ];
        let names = HashMap::from([(p1, "Atlas".to_string()), (p2, "Beacon".to_string())]);
        let mut wish = held(me, Uuid::new_v4(), "Go", 1);
        wish.is_desired = true;
        let skills = vec![held(me, Uuid::new_v4(), "Rust", 4), wish];

        let dash = build_employee_dashboard(
            &allocs,
            &names,
            &skills,
            EmployeeCounts {
                pending_work_requests: 2,
                unread_notifications: 5,
            },
            day(2025, 3, 1),
        );
        assert_eq!(dash.active_allocations.len(), 1);
        assert_eq!(dash.active_allocations[0].project_name, "Atlas");
        assert_eq!(dash.current_load, 60);
        assert_eq!(dash.free_capacity, 40);
        assert_eq!(dash.availability, Availability::PartiallyAllocated);
        assert_eq!(dash.skill_count, 1);
        assert_eq!(dash.desired_skill_count, 1);
        assert_eq!(dash.unread_notifications, 5);
    }

    #[test]
    fn test_pm_dashboard_members_and_coverage() {
        let atlas = project("Atlas");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (rust, sql) = (Uuid::new_v4(), Uuid::new_v4());
        let mut req = vec![required(rust, "Rust", 3), required(sql, "SQL", 2)];
        for r in &mut req {
            r.project_id = atlas.id;
        }
        let allocs = vec![
            allocation(a, atlas.id, 50, day(2025, 1, 1), day(2025, 12, 31)),
            allocation(a, atlas.id, 20, day(2025, 1, 1), day(2025, 12, 31)),
            allocation(b, atlas.id, 100, day(2025, 1, 1), day(2025, 12, 31)),
        ];
        let skills = vec![held(a, rust, "Rust", 4), held(b, sql, "SQL", 1)];
        let pending = HashMap::from([(atlas.id, 3)]);

        let dash = build_pm_dashboard(&[atlas], &allocs, &req, &skills, &pending);
        let summary = &dash.projects[0];
        assert_eq!(summary.member_count, 2);
        assert_eq!(summary.allocated_percentage, 170);
        assert_eq!(summary.staffing_coverage, 0.5);
        assert_eq!(summary.uncovered_skills, vec!["SQL".to_string()]);
        assert_eq!(dash.pending_resource_requests, 3);
    }

    #[test]
    fn test_manager_dashboard_sums_pending() {
        let report = user("ana", Some("eng"));
        let loads = HashMap::from([(report.id, 100)]);
        let dash = build_manager_dashboard(&[report], &loads, 2, 1);
        assert_eq!(dash.pending_approvals, 3);
        assert_eq!(dash.reports[0].availability, Availability::FullyAllocated);
        assert_eq!(dash.reports[0].free_capacity, 0);
    }

    #[test]
    fn test_hr_dashboard_departments_and_bench() {
        let ana = user("ana", Some("eng"));
        let bo = user("bo", Some("eng"));
        let cy = user("cy", None);
        let loads = HashMap::from([(ana.id, 80), (bo.id, 40)]);

        let dash = build_hr_dashboard(&[ana, bo, cy.clone()], &loads, 4, Vec::new());
        assert_eq!(dash.headcount, 3);
        assert_eq!(dash.departments.len(), 2);
        let eng = dash.departments.iter().find(|d| d.department == "eng").unwrap();
        assert_eq!(eng.headcount, 2);
        assert_eq!(eng.average_load, 60.0);
        assert_eq!(dash.average_utilisation, 40.0);
        assert_eq!(dash.bench.len(), 1);
        assert_eq!(dash.bench[0].user_id, cy.id);
        assert_eq!(dash.pending_hr_requests, 4);
    }

    #[test]
    fn test_hr_dashboard_empty() {
        let dash = build_hr_dashboard(&[], &HashMap::new(), 0, Vec::new());
        assert_eq!(dash.average_utilisation, 0.0);
        assert!(dash.departments.is_empty());
    }
}
